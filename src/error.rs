//! Error taxonomy for session lifecycle and trace emission
//!
//! Only two failure classes ever surface to callers: allocation failures
//! (session start, dump-time chunk construction) and I/O failures from the
//! trace writer. Ring exhaustion, call-stack overflow, and unmatched exits
//! are tolerated silently on the hot path and observable only through the
//! drop counters exported in the trace's attribute chunk.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors surfaced by session lifecycle operations
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("a profiling session is already active")]
    SessionActive,

    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("trace output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProfileError>;
