//! Crate-local error type.
//!
//! Geometry-out-of-bounds and no-path conditions are *not* represented here:
//! per the error handling design they're silently clipped or published as an
//! empty path, never surfaced as an `Err`. Only ingress failures are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("telemetry ingress failed: {0}")]
    Ingress(#[from] std::io::Error),

    #[error("telemetry frame truncated: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
}

pub type NavResult<T> = Result<T, NavError>;
