//! Error types for the load generator.
//!
//! [`ConfigError`] covers everything that is rejected before a run starts.
//! [`Error`] covers the WebSocket transport, the opening handshake and the
//! run itself. Check failures are tallied in the summary and are not errors.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for load generator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid run configuration. Always fatal, always raised before any
/// connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The virtual user count must be at least one.
    #[error("virtual user count must be greater than zero")]
    NoVirtualUsers,

    /// The test duration must be non-zero.
    #[error("test duration must be greater than zero")]
    ZeroDuration,

    /// A setting is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidSetting {
        /// Name of the offending setting.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The target URL could not be parsed or uses an unsupported scheme.
    #[error("invalid target URL '{url}': {reason}")]
    InvalidTarget {
        /// The URL as given.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file '{path}': {reason}")]
    FileRead {
        /// Path of the config file.
        path: String,
        /// Underlying I/O error.
        reason: String,
    },

    /// The config file is not valid TOML or does not match the schema.
    #[error("failed to parse config file '{path}': {reason}")]
    FileParse {
        /// Path of the config file.
        path: String,
        /// Parser message.
        reason: String,
    },
}

/// Errors that can occur while connecting to the target or running a test.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The run configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The preflight probe could not reach the target.
    #[error("target {target} unreachable: {reason}")]
    Unreachable {
        /// Target URL.
        target: String,
        /// The error reported by the probe.
        reason: String,
    },

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The connection was closed, with the peer's close code if one was sent.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// A write was attempted after our own close frame went out.
    ///
    /// This is the expected local-close path and is never reported.
    #[error("websocket: close sent")]
    CloseSent,

    /// The server answered the upgrade request with something other than 101.
    #[error("bad handshake: HTTP {status} {reason}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Reason phrase.
        reason: String,
    },

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake response exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A request header value contains CR or LF.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation did not finish in time.
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Which step timed out.
        stage: &'static str,
        /// The configured limit.
        after: Duration,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// An outgoing event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(String),

    /// A background task panicked or was cancelled unexpectedly.
    #[error("task failed: {0}")]
    Task(String),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },
}

impl Error {
    /// Returns `true` for the expected local-close signal, which is suppressed
    /// from error reporting.
    #[must_use]
    pub const fn is_local_close(&self) -> bool {
        matches!(self, Error::CloseSent)
    }

    /// Returns `true` if the error means the run could not start with the
    /// given configuration.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Unreachable { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
    }

    #[test]
    fn test_close_sent_matches_local_close_text() {
        assert_eq!(Error::CloseSent.to_string(), "websocket: close sent");
        assert!(Error::CloseSent.is_local_close());
        assert!(!Error::ConnectionClosed(None).is_local_close());
        assert!(!Error::Io("reset".into()).is_local_close());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(Error::from(ConfigError::NoVirtualUsers).is_configuration());
        assert!(
            Error::Unreachable {
                target: "ws://localhost:1".into(),
                reason: "refused".into(),
            }
            .is_configuration()
        );
        assert!(!Error::Timeout {
            stage: "connect",
            after: Duration::from_secs(1),
        }
        .is_configuration());
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: Error = ConfigError::ZeroDuration.into();
        assert_eq!(err.to_string(), "test duration must be greater than zero");
    }

    #[test]
    fn test_unexpected_status_display() {
        let err = Error::UnexpectedStatus {
            status: 404,
            reason: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "bad handshake: HTTP 404 Not Found");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
