use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegionError>;

/// Errors from region configuration and binding.
///
/// Everything here is recoverable at the bind boundary: partial state
/// (staged decoders, allocated address space) is unwound before the error is
/// returned, and nothing is silently retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("region is not fully configured")]
    Unconfigured,

    #[error("configuration order violation: {0}")]
    ConfigOrder(&'static str),

    #[error("invalid number of interleave ways")]
    InvalidWays,

    #[error("invalid interleave granularity")]
    InvalidGranularity,

    #[error("size must be a multiple of 256MiB times interleave ways")]
    InvalidSize,

    #[error("missing memory device target{0}")]
    MissingTarget(usize),

    #[error("target{0} is not CXL.mem capable")]
    TargetNotReady(usize),

    #[error("region is active")]
    Busy,

    #[error("could not allocate address space")]
    OutOfAddressSpace,

    #[error("address range already claimed in the platform resource")]
    ReservationConflict,

    #[error("no compatible root decoder for this region")]
    NoCompatibleRootDecoder,

    #[error("switch topologies are not supported")]
    UnsupportedSwitchTopology,

    #[error("target order does not match root port wiring")]
    PortGroupingMismatch,

    #[error("no unclaimed decoder available on a required port")]
    NoFreeDecoder,

    #[error(transparent)]
    Hdm(#[from] cxl_hdm::HdmError),
}
