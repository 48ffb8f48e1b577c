use thiserror::Error;

use crate::finder::{FinderError, RadiusConvention};

/// Errors raised by the detection pipeline.
#[derive(Error, Debug)]
pub enum SpotError {
    /// Reference image (or a measurement vector) disagrees with the stack.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Both an explicit reference image and a max projection were requested.
    #[error("an explicit reference image and reference_from_max_projection are mutually exclusive")]
    ConflictingMode,

    /// No (round, channel) planes to process.
    #[error("image stack has no (round, channel) planes")]
    EmptyStack,

    /// Tables with different radius conventions cannot be combined.
    #[error("cannot combine tables with radius convention {expected:?} and {found:?}")]
    MixedConvention {
        expected: RadiusConvention,
        found: RadiusConvention,
    },

    /// Tables disagree on their round or channel labels.
    #[error("axis mismatch: {0}")]
    AxisMismatch(String),

    /// Malformed stack construction input.
    #[error("invalid image stack: {0}")]
    InvalidStack(String),

    /// Spot finding plugin failed.
    #[error(transparent)]
    Finder(#[from] FinderError),

    /// Aggregation plugin failed.
    #[error("aggregation failed: {0}")]
    Aggregate(String),
}

pub type Result<T> = std::result::Result<T, SpotError>;
