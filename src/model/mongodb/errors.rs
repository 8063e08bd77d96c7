//! Server error codes the driver leaves as bare integers.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

/// `E11000 duplicate key error`.
pub const DUPLICATE_KEY: i32 = 11000;

/// Did this write fail because it would have broken a unique index?
///
/// Covers both single writes and bulk writes where any constituent write
/// hit the index.
pub fn is_duplicate_key(err: &DbError) -> bool {
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
