use std::fmt;

/// Broad error class reported to the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Server,
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Client => write!(f, "Client"),
            ErrorKind::Server => write!(f, "Server"),
            ErrorKind::Transport => write!(f, "Transport"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BotError {
    /// Local failure: missing device or host seam, denied permission,
    /// malformed local state.
    #[error("client error: {0}")]
    Client(String),

    /// Failure reported by the backend for this session.
    #[error("server error: {0}")]
    Server(String),

    /// Socket failed or closed unexpectedly. Fatal: there is no automatic
    /// reconnect, the host must re-initialize the session.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BotError {
    pub fn client(message: impl Into<String>) -> Self {
        BotError::Client(message.into())
    }

    pub fn server(message: impl Into<String>) -> Self {
        BotError::Server(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        BotError::Transport(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::Client(_) => ErrorKind::Client,
            BotError::Server(_) => ErrorKind::Server,
            BotError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BotError::Client(m) | BotError::Server(m) | BotError::Transport(m) => m,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
