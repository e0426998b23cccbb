/// Error types for the chat session core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Dial or transport failure
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// Login or registration rejected by the server
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Action attempted while disconnected or logged out
    #[error("{0}")]
    Precondition(String),

    /// Settings file missing or corrupt
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handler already registered for event \"{0}\"")]
    DuplicateHandler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    pub fn not_connected() -> Self {
        ChatError::Precondition("You are not connected to the server.".to_string())
    }

    pub fn not_logged_in() -> Self {
        ChatError::Precondition("You are not logged in.".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
