use thiserror::Error;

/// Error taxonomy shared by every public operation in the simulator (see
/// spec §7). No operation returns a bare `String` or `bool` for failure;
/// everything funnels through one of these kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("component not initialized")]
    NotInitialized,

    #[error("component already initialized")]
    AlreadyInitialized,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("port is down")]
    PortDown,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("out of bounds")]
    OutOfBounds,

    #[error("no memory")]
    NoMemory,

    #[error("checksum failure")]
    ChecksumFailure,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    UnknownError(String),
}

pub type SimResult<T> = std::result::Result<T, SimError>;
