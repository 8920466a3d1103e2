pub mod config;
pub mod error;
pub mod types;

pub use config::{EnrichConfig, MAX_BATCH_SIZE};
pub use error::FtpError;
pub use types::*;
