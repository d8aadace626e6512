/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    ConfigYaml(#[from] serde_yaml::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // HTTP
    // =========
    #[error("Invalid URL/URI: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    // =========
    // Serialization / deserialization
    // =========
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    // =========
    // Database
    // =========
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database connection lost")]
    DbConnectionLost,

    // =========
    // Cache / event log
    // =========
    #[error("Cache event log overflow (limit={limit})")]
    EventLogOverflow { limit: usize },

    #[error("Cache lookup for {0:?} produced no value")]
    CacheEmpty(String),

    #[error("Unknown cache event op-code for key {0:?}")]
    UnknownOpCode(String),

    // =========
    // Consumer / broker
    // =========
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Message validation failed: {0}")]
    ValidationFailed(String),

    // =========
    // Timestamp keeper
    // =========
    #[error("Timestamp file error: {0}")]
    Timestamp(String),

    // =========
    // Application-domain errors
    // =========
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Shutdown requested")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}
