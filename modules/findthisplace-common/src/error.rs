use thiserror::Error;

#[derive(Error, Debug)]
pub enum FtpError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run cancelled")]
    Cancelled,
}
