use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid service configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Config record already exists: {0}")]
    AlreadyExists(String),

    #[error("Config record not found: {0}")]
    RecordNotFound(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
