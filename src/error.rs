/// Errors returned from various operations.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("I/O error: {0:?}")]
    IoError(::std::io::ErrorKind),

    #[error("Nom error: {0:?}")]
    NomError(nom::error::ErrorKind),

    /// A [Message](super::Message) or modem command was not acknowledged.
    #[error("Command was not acknowledged")]
    NotAcknowledged,

    /// Failure to parse a [Message](super::Message) or modem command.
    #[error("Parse error")]
    Parse,

    /// An operation took too long to complete.
    #[error("Operation timed out")]
    Timeout,

    /// An unexpected response was received.
    #[error("Unexpected response received")]
    UnexpectedResponse,

    /// An invalid [Address](super::Address) string was passed.
    #[error("Invalid address format. Expected 'xx.xx.xx'.")]
    InvalidAddress,

    /// The modem was disconnected.
    #[error("Modem was disconnected.")]
    Disconnected,

    /// A frame or message was explicitly NAK'd by the modem.
    #[error("Command was not acknowledged (NAK)")]
    NoAck,

    /// A handler or sequence was canceled before it finished.
    #[error("Operation was canceled")]
    Canceled,

    /// The local all-link database copy no longer matches the device's
    /// delta and must be refetched before it can be trusted, spec.md §3.
    #[error("Device database is stale and must be refreshed")]
    StaleDatabase,

    /// A requested mode/flag/group is not valid for this device or is not
    /// yet implemented.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A `CommandSequence` step reported failure.
    #[error("Command sequence failed: {0}")]
    SequenceFailed(String),

    /// A command for a device was rejected by the administrative command
    /// guard (spec.md §6).
    #[error("Command rejected: {0}")]
    CommandRejected(String),
}

impl From<::std::io::Error> for Error {
    fn from(e: ::std::io::Error) -> Error {
        Error::IoError(e.kind())
    }
}

impl From<nom::error::ErrorKind> for Error {
    fn from(e: nom::error::ErrorKind) -> Error {
        Error::NomError(e)
    }
}

impl From<futures::channel::mpsc::SendError> for Error {
    fn from(_: futures::channel::mpsc::SendError) -> Error {
        Error::Disconnected
    }
}
