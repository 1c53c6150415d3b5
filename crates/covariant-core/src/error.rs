//! Error type shared by the fallible core operations.

/// Errors raised by precondition checks on caller-provided data.
///
/// Boundary policies never fail and adaptation failures are reported as
/// [`crate::adapt::AdaptationOutcome`] values, so this type only covers
/// out-of-range queries and malformed inputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A sub-pixel query fell outside `[0, size)` on `axis`.
    #[error("cannot interpolate: position {position} is out of range [0, {size}) on axis {axis}")]
    OutOfRange {
        axis: usize,
        position: f64,
        size: usize,
    },

    /// A buffer length does not match the product of the requested sizes.
    #[error("buffer of length {actual} does not match image sizes (expected {expected})")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Parameters loaded at runtime failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

pub type Result<T> = core::result::Result<T, Error>;
