/// Result alias that carries the custom [`EngineError`] type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A scheduling or authoring request was malformed (negative beat,
    /// negative duration, non-positive tempo, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The authoritative clock reported an exceptional state. Fatal to the
    /// session.
    #[error("clock fault: {0}")]
    ClockFault(String),
    /// An event hook failed while the timeline was advancing.
    #[error("event `{kind}` at beat {beat} failed: {source}")]
    HookFault {
        kind: &'static str,
        beat: f64,
        #[source]
        source: Box<EngineError>,
    },
    /// Free-form error raised by collaborators such as side-mode scripts.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Chart or config documents that failed to (de)serialise.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns `true` for errors that must tear the session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ClockFault(_) | Self::HookFault { .. })
    }
}

impl From<&str> for EngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
