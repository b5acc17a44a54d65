use thiserror::Error;

/// Errors produced while validating or converting model types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown {kind} variant: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
