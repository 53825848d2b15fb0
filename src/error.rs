// src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("unsupported currency: {0}")]
    BadCurrency(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    /// Wraps a downstream failure that must reach an operator with its
    /// original cause attached.
    #[error("{message}")]
    Reportable {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn reportable(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Reportable {
            message: message.into(),
            source: source.into(),
        }
    }
}
