use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Credential errors
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid reader id: {0}")]
    InvalidReaderId(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid UID format: {0}")]
    InvalidUidFormat(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
