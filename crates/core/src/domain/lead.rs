use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::Entity;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Routed,
    /// Delivered: the linked delivery reached `sent`.
    Livre,
    Duplicate,
    HoldSource,
    NoOpenOrders,
    PendingConfig,
    Invalid,
    ReservedForReplacement,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Routed => "routed",
            Self::Livre => "livre",
            Self::Duplicate => "duplicate",
            Self::HoldSource => "hold_source",
            Self::NoOpenOrders => "no_open_orders",
            Self::PendingConfig => "pending_config",
            Self::Invalid => "invalid",
            Self::ReservedForReplacement => "reserved_for_replacement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "routed" => Some(Self::Routed),
            "livre" => Some(Self::Livre),
            "duplicate" => Some(Self::Duplicate),
            "hold_source" => Some(Self::HoldSource),
            "no_open_orders" => Some(Self::NoOpenOrders),
            "pending_config" => Some(Self::PendingConfig),
            "invalid" => Some(Self::Invalid),
            "reserved_for_replacement" => Some(Self::ReservedForReplacement),
            _ => None,
        }
    }

    /// Terminal lead states are never reopened. `no_open_orders` is not
    /// terminal: those leads re-enter routing once an order reactivates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Livre | Self::Duplicate | Self::Invalid)
    }

    /// Statuses in which a backlog lead may still be claimed as a
    /// replacement for a suspicious lead.
    pub fn is_backlog_available(&self) -> bool {
        matches!(self, Self::New | Self::NoOpenOrders | Self::HoldSource)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadQuality {
    Valid,
    Suspicious,
    Invalid,
}

impl LeadQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Suspicious => "suspicious",
            Self::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid" => Some(Self::Valid),
            "suspicious" => Some(Self::Suspicious),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub entity: Entity,
    pub phone: String,
    pub product: String,
    pub department: Option<String>,
    pub session_id: Option<String>,
    pub status: LeadStatus,
    pub quality: LeadQuality,
    pub is_backlog: bool,
    pub backlog_since: Option<DateTime<Utc>>,
    pub was_replaced: bool,
    pub replacement_source: Option<String>,
    pub replacement_lead_id: Option<LeadId>,
    pub delivery_id: Option<String>,
    pub delivery_commande_id: Option<String>,
    pub delivered_to_client_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub routed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a submitter provides. Everything else starts at its neutral value.
#[derive(Clone, Debug, Deserialize)]
pub struct NewLead {
    pub entity: Entity,
    pub phone: String,
    pub product: String,
    pub department: Option<String>,
    pub session_id: Option<String>,
}

impl Lead {
    /// Required fields (phone, product) are enforced here, not at the
    /// call sites that later read them.
    pub fn create(input: NewLead, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let phone = input.phone.trim().to_string();
        if phone.is_empty() {
            return Err(DomainError::InvariantViolation(
                "lead phone is required".to_string(),
            ));
        }
        let product = input.product.trim().to_string();
        if product.is_empty() {
            return Err(DomainError::InvariantViolation(
                "lead product is required".to_string(),
            ));
        }

        Ok(Self {
            id: LeadId::generate(),
            entity: input.entity,
            phone,
            product,
            department: input.department.filter(|value| !value.trim().is_empty()),
            session_id: input.session_id.filter(|value| !value.trim().is_empty()),
            status: LeadStatus::New,
            quality: LeadQuality::Valid,
            is_backlog: false,
            backlog_since: None,
            was_replaced: false,
            replacement_source: None,
            replacement_lead_id: None,
            delivery_id: None,
            delivery_commande_id: None,
            delivered_to_client_id: None,
            delivered_at: None,
            routed_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}
