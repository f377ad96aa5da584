use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stale market data for {symbol}: {age_ms} ms old")]
    StaleData { symbol: String, age_ms: i64 },

    #[error("Concurrency limit reached ({limit} executions in flight)")]
    ConcurrencyLimit { limit: usize },

    #[error("Leg {leg} failed: {cause}")]
    LegFailure { leg: usize, cause: String },

    #[error("Risk {aggregate:.2} exceeds ceiling {ceiling:.2}")]
    RiskExceeded { aggregate: f64, ceiling: f64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Parse float error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Other: {0}")]
    Other(String),
}
