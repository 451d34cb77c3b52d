use thiserror::Error;

pub type Result<T> = std::result::Result<T, HdmError>;

/// Errors raised while enumerating or programming HDM decoders.
///
/// Enumeration errors (`NoDecoders`, `InvalidRange`, `InvalidWays`) mean the
/// capability block or an instance's register content is malformed. Commit
/// errors (`Busy`, `CommitTimeout`, `CommitError`)
/// surface hardware state to the caller; the decoder is left in its
/// last-known state, never assumed disabled. `InvalidState` is a
/// software-flag/hardware disagreement, i.e. a caller bug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HdmError {
    #[error("capability block advertises no decoders")]
    NoDecoders,

    #[error("no valid decoders found")]
    NoValidDecoders,

    #[error("decoder {index}: invalid resource range")]
    InvalidRange { index: usize },

    #[error("decoder {index}: invalid interleave ways (ctrl {ctrl:#x})")]
    InvalidWays { index: usize, ctrl: u32 },

    #[error("decoder is live; quiesce the system before reprogramming")]
    Busy,

    #[error("decoder commit timeout (ctrl {ctrl:#x})")]
    CommitTimeout { ctrl: u32 },

    #[error("hardware reported a commit error (ctrl {ctrl:#x})")]
    CommitError { ctrl: u32 },

    #[error("invalid decoder state: {0}")]
    InvalidState(&'static str),

    #[error("port publishes no component registers")]
    NoRegisters,

    #[error(transparent)]
    Interleave(#[from] cxl_regs::InterleaveError),
}
