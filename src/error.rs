//! Application-wide error types.
//!
//! Component errors (`BootstrapError`, `SignatureError`, …) live next to the
//! component that raises them. `AppError` is what the binary entry point sees.

use thiserror::Error;

use crate::supervisor::NodeError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
