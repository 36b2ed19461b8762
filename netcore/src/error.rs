use std::io;

/// Errors raised while decoding or encoding a DIS primitive.
///
/// Every variant here corresponds to one of the status codes the original DIS
/// library returns (`DIS_PROTOCOL`, `DIS_EOD`, `DIS_OVERFLOW`, `DIS_NOCOMMIT`, ...).
#[derive(Debug, thiserror::Error, Eq, PartialEq, Clone, Copy)]
pub enum DisError {
    #[error("non-digit byte encountered while decoding a DIS integer")]
    Protocol,
    #[error("stream ended before a complete DIS value could be read")]
    Eod,
    #[error("decoded magnitude does not fit in the target width")]
    Overflow,
    #[error("read or write succeeded but the stream failed to commit the cursor")]
    NoCommit,
}

/// Errors raised by the connection table.
#[derive(Debug, thiserror::Error, Eq, PartialEq, Clone, Copy)]
pub enum TableError {
    #[error("connection table has no free slot")]
    TableFull,
    #[error("no connection table entry matches the given descriptor")]
    NotFound,
    #[error("a connection table entry already exists for the given descriptor")]
    AlreadyRegistered,
}

/// Errors raised while resolving a peer's hostname.
#[derive(Debug, thiserror::Error, Eq, PartialEq, Clone, Copy)]
pub enum PeerError {
    #[error("resolved hostname does not fit in the supplied buffer")]
    TooLong,
}

/// Process-fatal errors: anything here means the core cannot continue operating at
/// all, as opposed to one connection being torn down.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to determine the process descriptor limit: {0}")]
    DescriptorLimit(io::Error),
    #[error("failed to allocate the connection table")]
    OutOfMemory,
    #[error("failed to initialize the readiness primitive: {0}")]
    ReadinessInit(io::Error),
    #[error("a third call to init_network is not supported")]
    TooManyGenerations,
    #[error("failed to bind and listen on the requested port: {0}")]
    ListenFailed(io::Error),
    #[error("the readiness wait returned a fatal error: {0}")]
    WaitFailed(io::Error),
}
