//! Runtime adapters for promptfix (config, history persistence, verification).

pub mod config;
pub mod error;
pub mod history;
pub mod verify;

pub use error::{ConfigurationError, VerificationRejected};
