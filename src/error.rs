//! Error types and result utilities for the mastering pipeline.

use thiserror::Error;

/// Convenience type alias for results that may contain [`MasterError`].
pub type MasterResult<T> = Result<T, MasterError>;

/// Error types that can occur during pipeline operations.
///
/// Recoverable numeric edge cases (empty channel sets, zero-length windows,
/// zero divisors) are resolved locally with epsilon floors or early returns
/// and never surface here. What does surface is either unusable
/// configuration or a non-finite value detected inside an accumulated mute
/// factor, which invalidates the analysis of the affected channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MasterError {
    /// A NaN or infinity appeared in an accumulated mute factor.
    ///
    /// The affected channel's analysis is aborted; already completed
    /// channels keep their results for diagnosis.
    #[error("non-finite mute factor in channel {channel} at sample {sample}")]
    NonFinite {
        /// Index of the channel whose analysis produced the value.
        channel: usize,
        /// Sample position (at analysis rate) where it was detected.
        sample: usize,
    },

    /// Configuration that cannot be clamped to something usable.
    ///
    /// Recoverable inconsistencies (reduction order above one, inverted
    /// shift ranges, oversized transitions) are clamped with a logged
    /// warning instead and do not produce this error.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
