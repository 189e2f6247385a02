//! Error types for the video wall core.

use std::fmt;

/// Errors that can occur anywhere in the ingest core.
///
/// Variants map to the failure taxonomy of the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`Disconnected`](Self::Disconnected),
///   [`Timeout`](Self::Timeout), [`Status`](Self::Status). These end the
///   current session attempt; the camera's housekeeping timer retries.
/// - **Protocol**: [`Parse`](Self::Parse), [`Protocol`](Self::Protocol),
///   [`Aborted`](Self::Aborted). Handled like a failed DESCRIBE.
/// - **Reactor**: [`TableFull`](Self::TableFull),
///   [`StaleHandle`](Self::StaleHandle), [`NoEngine`](Self::NoEngine),
///   [`UnknownTransfer`](Self::UnknownTransfer).
/// - **Setup**: [`Config`](Self::Config), [`InvalidUri`](Self::InvalidUri),
///   [`UnknownCamera`](Self::UnknownCamera).
#[derive(Debug, thiserror::Error)]
pub enum WallError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every slot of the endpoint table is in use.
    #[error("endpoint table full ({0} slots)")]
    TableFull(usize),

    /// The endpoint handle refers to a released (or reused) slot.
    #[error("stale endpoint handle")]
    StaleHandle,

    /// Failed to parse an RTSP/HTTP response message.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The peer answered with a non-2xx status.
    #[error("status {code} {reason}")]
    Status { code: u16, reason: String },

    /// A well-formed response that cannot drive the session further
    /// (missing control path, body shorter than declared, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection closed while an exchange was outstanding.
    #[error("connection closed by peer")]
    Disconnected,

    /// Connect or response deadline elapsed.
    #[error("timed out")]
    Timeout,

    /// An exchange callback asked the engine to abort the transfer.
    #[error("transfer aborted by callback")]
    Aborted,

    /// The transfer handle is not known to the engine.
    #[error("unknown transfer handle")]
    UnknownTransfer,

    /// No transfer engine is attached to the reactor.
    #[error("no transfer engine attached")]
    NoEngine,

    /// The URI could not be split into host, port and path.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// The configuration file is unreadable or inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// A key binding or view references a camera that does not exist.
    #[error("unknown camera: {0}")]
    UnknownCamera(String),
}

/// Specific kind of response parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a decimal number.
    InvalidContentLength,
    /// Status line plus headers exceeded the read limit without a blank line.
    MessageTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::MessageTooLarge => write!(f, "message head too large"),
        }
    }
}

impl WallError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Convenience alias for `Result<T, WallError>`.
pub type Result<T> = std::result::Result<T, WallError>;
