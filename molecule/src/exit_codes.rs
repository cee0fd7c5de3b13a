//! Stable exit codes for `mol` commands.

use crate::error::MolError;

/// Command succeeded, including no-op outcomes.
pub const OK: i32 = 0;
/// Command failed for any other reason (ledger, config, I/O, bond rejection).
pub const FAILED: i32 = 1;
/// Template failed step validation.
pub const VALIDATION: i32 = 2;
/// Hook already holds an instance and `--force` was not given.
pub const COLLISION: i32 = 3;
/// Template, record or hook not found.
pub const NOT_FOUND: i32 = 4;

pub fn for_error(err: &MolError) -> i32 {
    match err {
        MolError::Validation { .. } => VALIDATION,
        MolError::Collision { .. } => COLLISION,
        MolError::NotFound { .. } => NOT_FOUND,
        _ => FAILED,
    }
}
