//! Deterministic, pure logic for the molecule workflow model.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and template bodies and return deterministic outputs suitable for tests.

pub mod bond;
pub mod digest;
pub mod graph;
pub mod progress;
pub mod provenance;
pub mod steps;
pub mod types;
pub mod vars;
