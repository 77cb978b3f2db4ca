//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
///
/// The vote ledger uses this to translate a lost uniqueness race into the
/// `AlreadyVoted` outcome instead of a generic storage error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref e)) => e.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(ref failure) => failure
            .write_errors
            .as_ref()
            .map(|errors| errors.iter().any(|e| e.code == DUPLICATE_KEY))
            .unwrap_or(false),
        _ => false,
    }
}
