//! Error types for the support ledger.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    /// Map a libsql error, keeping uniqueness violations distinguishable.
    pub fn from_libsql(context: &str, e: libsql::Error) -> Self {
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed") {
            DatabaseError::Constraint(format!("{context}: {message}"))
        } else {
            DatabaseError::Query(format!("{context}: {message}"))
        }
    }
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Request to {endpoint} failed with status {status}: {body}")]
    RequestFailed {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Transport error calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Company/contact directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory request failed: {0}")]
    Transport(String),

    #[error("Invalid directory response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while reconciling events or driving a conversation.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Already stored: {0}")]
    Duplicate(String),

    #[error("Inconsistent upstream event: {0}")]
    UpstreamBug(String),

    #[error("Upstream request failed: {0}")]
    UpstreamRequest(#[from] UpstreamError),

    #[error("Directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl FlowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        FlowError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether a deferred action failing with this error may be run again.
    ///
    /// State-changing calls to the chat platform are never repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::NotFound { .. } => true,
            FlowError::Database(DatabaseError::Constraint(_)) => false,
            FlowError::Database(_) => true,
            FlowError::Directory(DirectoryError::Transport(_)) => true,
            _ => false,
        }
    }
}
