/// Result alias that carries the custom [`ButlerError`] type.
pub type Result<T> = std::result::Result<T, ButlerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ButlerError {
    /// Free-form failure surfaced with a readable message.
    #[error("{0}")]
    Message(String),
    /// The configuration file is missing a value or holds an invalid one.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A hardware collaborator (camera, printer) could not be acquired.
    #[error("{device} unavailable: {reason}")]
    Hardware { device: String, reason: String },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ButlerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn hardware(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hardware {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ButlerError {
    fn from(value: toml::de::Error) -> Self {
        Self::Config(value.to_string())
    }
}

/// Failure reported by an effectful backend (playback, printing, labels).
///
/// Sink failures are never fatal: the dispatcher converts them into an
/// ignored outcome and the control loop keeps scanning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{sink} sink failed: {reason}")]
pub struct SinkError {
    pub sink: &'static str,
    pub reason: String,
}

impl SinkError {
    pub fn new(sink: &'static str, reason: impl Into<String>) -> Self {
        Self {
            sink,
            reason: reason.into(),
        }
    }

    pub fn playback(reason: impl Into<String>) -> Self {
        Self::new("playback", reason)
    }

    pub fn print(reason: impl Into<String>) -> Self {
        Self::new("print", reason)
    }
}
