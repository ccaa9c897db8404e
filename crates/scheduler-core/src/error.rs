//! Scheduler error types.
//!
//! The CORE has exactly one error a caller can observe directly:
//! [`SchedulerError::InvalidFrameRate`] from [`crate::Scheduler::force_frame_rate`].
//! Everything else the spec calls an "error" (malformed priority, cancellation,
//! reentrant work-loop entry) is handled by silent normalization or by
//! construction, not by returning `Err`.

use thiserror::Error;

/// Errors surfaced by the scheduler's public API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `force_frame_rate` was called with a value outside `[0, 125]`.
    ///
    /// Per spec §4.2/§7 this is logged and leaves state unchanged; it is
    /// also returned as `Err` so callers that want strict handling can opt
    /// in instead of only seeing a log line.
    #[error("forceFrameRate: {fps} is out of range [0, 125]")]
    InvalidFrameRate {
        /// The rejected frames-per-second value.
        fps: i32,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;
