use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// HTTP status an outer request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Schema(_) | Self::InvalidParameter(_) | Self::UnsupportedAlgorithm(_) => 400,
            Self::NotFound(_) => 404,
            Self::InvalidState(_) => 409,
            Self::Config(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema_error",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
