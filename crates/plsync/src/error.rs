//! Errors raised while configuring the synchronisation stages.
//!
//! Per frame failures such as a missed start of frame or an out of range frequency estimate
//! are part of normal operation and are reported through state, never through these errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlSyncError {
    #[error("Invalid number of samples per symbol {0}")]
    InvalidSamplesPerSymbol(f32),

    #[error("Loop bandwidth must be positive but got {0}")]
    InvalidLoopBandwidth(f32),

    #[error("Damping factor must be non-negative but got {0}")]
    InvalidDampingFactor(f32),

    #[error("Rolloff factor must be within (0,1] but got {0}")]
    InvalidRolloff(f32),

    #[error("Polyphase interpolator requires a non-zero {0}")]
    InvalidPolyphaseBank(&'static str),

    #[error("Gold code {0} exceeds the maximum of {max}", max = dvbs2_core::pl_parameters::MAX_GOLD_CODE)]
    InvalidGoldCode(u32),

    #[error("Codeword index {0} is outside of the 128 PLSC codewords")]
    InvalidCodeword(usize),

    #[error("At least one PLSC codeword must be accepted by the decoder")]
    EmptyCodewordSet,

    #[error("Frequency estimation period must be at least one frame")]
    InvalidEstimationPeriod,

    #[error("Frame sync configuration error: {0}")]
    FrameSync(String),
}

/// Result type alias for fallible construction of synchronisation stages.
pub type PlSyncResult<T> = Result<T, PlSyncError>;
