use thiserror::Error;

use crate::protocol::DispatchError;

#[derive(Error, Debug)]
pub enum Error {
    /// The server connection could not be established. Fatal for the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol message could not be handed to the connection
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Operation {operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Already released")]
    Released,

    #[error("Locator already tuned by another session: {0}")]
    AlreadyTuned(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Unknown program: {0}")]
    UnknownProgram(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether the error ends the session rather than degrading a single request
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Released)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
