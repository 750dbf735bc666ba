//! Result and error types representing the outcome of register allocation.

use crate::regalloc::IntervalConflict;
use crate::settings::Strategy;
use thiserror::Error;

/// A register allocation error.
///
/// None of these errors are transient. A failed allocation should never be retried with the same
/// inputs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The interference validator found two intervals sharing a register or a spill slot.
    ///
    /// This always represents a bug, either in the allocation strategy or in the liveness
    /// analysis that produced the intervals.
    #[error("Verifier error: {0}")]
    Verifier(#[from] IntervalConflict),

    /// The requested allocation strategy is known but no longer available.
    #[error("{} register allocator has been removed", .0.description())]
    RemovedStrategy(Strategy),

    /// There is no register description for the requested target.
    #[error("Unsupported target architecture: {0}")]
    UnsupportedTarget(String),
}

/// A convenient alias for a `Result` that uses `AllocError` as the error type.
pub type AllocResult<T> = Result<T, AllocError>;
