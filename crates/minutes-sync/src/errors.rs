/// Errors returned by a collaborator (status/result requests, opening or
/// reading the summary stream).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the response body could not be read.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The backend answered with a non-success status.
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    /// The response body did not have the expected shape.
    #[error("decode error: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message } | Self::Http { message, .. } | Self::Decode { message } => {
                message
            }
        }
    }
}

/// Terminal failure of one channel (the poller or the summary stream).
///
/// Delivered at most once per channel through the `on_error` hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelFailure {
    /// The request or stream read failed underneath the channel.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The backend explicitly reported an error; the message is passed through verbatim.
    #[error("{message}")]
    Server { message: String },
}

impl ChannelFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Returns the message shown to the user.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message } | Self::Server { message } => message,
        }
    }
}

impl From<ApiError> for ChannelFailure {
    fn from(value: ApiError) -> Self {
        ChannelFailure::Transport {
            message: value.to_string(),
        }
    }
}

/// Why a single stream frame was skipped. Never escalates to a channel failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("frame data is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("token frame has no string `t` field")]
    MissingTokenText,
    #[error("context frame payload is not a JSON object")]
    ContextNotObject,
}

/// Top-level error type for session and configuration operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// An operation needed a current job and none is set.
    #[error("no active job")]
    NoActiveJob,
    /// A summary stream is already running for this session.
    #[error("summary stream already running")]
    AlreadyStreaming,
    /// A collaborator request failed before a channel was established.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A channel ended with a terminal failure.
    #[error(transparent)]
    Channel(#[from] ChannelFailure),
}
