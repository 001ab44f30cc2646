//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] stockfeed_ws::WsError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] stockfeed_telemetry::TelemetryError),

    #[error("Quote client error: {0}")]
    Quote(#[from] stockfeed_quote::QuoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
