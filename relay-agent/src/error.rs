//! # Agent error kinds (spec §7)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("relay closed the connection for a non-retryable reason: {0}")]
    Terminal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("local service unreachable: {0}")]
    LocalServiceUnreachable(String),
}
