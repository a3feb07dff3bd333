//! Error types for configuration loading and validation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer (file or environment) could not be extracted into the config structs.
    #[error("failed to load configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid value for '{field}': {hint}")]
    InvalidValue { field: String, hint: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, hint: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            hint: hint.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Extract(Box::new(err))
    }
}
