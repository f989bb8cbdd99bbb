use thiserror::Error;

use crate::domain::delivery::DeliveryStatus;

/// Violations of the domain's hard rules. These indicate a caller bug and
/// are raised before any datastore write.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error(
        "invalid delivery transition for {delivery_id}: {from:?} -> {to:?} (allowed: {allowed:?})"
    )]
    InvalidDeliveryTransition {
        delivery_id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
        allowed: Vec<DeliveryStatus>,
    },
    #[error("delivery {delivery_id} is terminal (sent); refusing {attempted:?}")]
    TerminalDelivery { delivery_id: String, attempted: DeliveryStatus },
    #[error("sent invariant violated for {delivery_id}: {condition}")]
    SentInvariantViolation { delivery_id: String, condition: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Transient failures are eligible for retry via the failed ->
    /// sending / failed -> pending_csv edges; invariant violations and
    /// not-found conditions are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_))
    }
}
