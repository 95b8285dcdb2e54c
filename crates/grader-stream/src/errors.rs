/// Fatal failures of the byte transport feeding a stream.
///
/// A transport error terminates the read loop; everything decoded before it
/// stays visible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection could not be opened.
    #[error("connect error: {message}")]
    Connect { message: String },
    /// Reading the next body chunk failed.
    #[error("read error: {message}")]
    Read { message: String },
    /// No chunk arrived within the configured idle window.
    #[error("no data received for {seconds}s")]
    IdleTimeout { seconds: u64 },
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a read-level error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }
}

/// Non-fatal failure to turn one frame into a `StreamEvent`.
///
/// The driver logs these and moves on to the next frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame payload is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Valid JSON that matches none of the known event shapes.
    #[error("unrecognized event shape (keys: {keys})")]
    UnrecognizedShape { keys: String },
    /// A known shape whose field has an unexpected type or value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Non-fatal protocol irregularities detected while interpreting events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A progress label did not follow the `Eval a/b - Model: ...` grammar.
    #[error("unparsable progress label: {label}")]
    UnparsableProgressLabel { label: String },
}

/// Errors returned by the public monitor and configuration API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// Transport failure surfaced outside of a running stream.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for MonitorError {
    fn from(value: TransportError) -> Self {
        MonitorError::Transport(value)
    }
}
