/// Errors reported by the BMS core and the AFE driver contract.
///
/// Communication failures are transient: the caller keeps the previous
/// measurements and error flags and retries on the next update cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Communication with the AFE failed. Prior state is preserved.
    #[error("AFE communication error: {0}")]
    Comm(&'static str),
    /// A manual balancing request was made while automatic balancing is active.
    #[error("automatic balancing active, manual request rejected")]
    Busy,
    /// A parameter outside the contract of the driver, e.g. a balancing mask
    /// with adjacent cells set or an unknown switch bit.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),
    /// The operation is not supported by this AFE.
    #[error("operation not supported by this AFE")]
    NotSupported,
    /// An I/O error from an underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for BMS core operations.
pub type Result<T> = std::result::Result<T, Error>;
