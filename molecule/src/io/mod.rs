//! I/O helpers for molecule commands: the ledger seam, catalog scope files,
//! configuration, workspace scaffolding, session notification and rendering.

pub mod catalog;
pub mod config;
pub mod init;
pub mod ledger;
pub mod ledger_store;
pub mod process;
pub mod render;
pub mod session;
