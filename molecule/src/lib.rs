//! Molecule workflow model: templates, instances, bonds and hooks over a shared
//! record ledger.
//!
//! A template (solid phase) is poured into a durable instance (liquid) or
//! created as an ephemeral instance (vapor). Instances are squashed into digests
//! or, when ephemeral, burned. The crate is split the usual way:
//!
//! - **[`core`]**: pure, deterministic logic (step parsing, graph validation, the
//!   bond table, progress classification, digests). No I/O.
//! - **[`io`]**: side effects (ledger stores, catalog files, config, session
//!   notification, rendering).
//!
//! Orchestration modules ([`catalog`], [`instantiate`], [`phase`], [`progress`],
//! [`hook`], [`commands`]) combine the two into the operations the `mol` CLI
//! exposes.

pub mod catalog;
pub mod commands;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod hook;
pub mod instantiate;
pub mod io;
pub mod logging;
pub mod phase;
pub mod progress;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
