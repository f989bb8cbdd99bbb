use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::Entity;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Invoiced,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Invoiced => "invoiced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "invoiced" => Some(Self::Invoiced),
            _ => None,
        }
    }
}

/// Ledger entry recording that one entity's lead was billed to a client of
/// the other entity. At most one transfer exists per delivery id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntercompanyTransfer {
    pub id: TransferId,
    pub lead_id: String,
    pub delivery_id: String,
    pub commande_id: String,
    pub from_entity: Entity,
    pub to_entity: Entity,
    pub product: String,
    pub unit_price: Decimal,
    pub status: TransferStatus,
    pub week_key: String,
    pub created_at: DateTime<Utc>,
}

impl IntercompanyTransfer {
    pub fn pending(
        lead_id: impl Into<String>,
        delivery_id: impl Into<String>,
        commande_id: impl Into<String>,
        from_entity: Entity,
        to_entity: Entity,
        product: impl Into<String>,
        unit_price: Decimal,
        week_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId(Uuid::new_v4().to_string()),
            lead_id: lead_id.into(),
            delivery_id: delivery_id.into(),
            commande_id: commande_id.into(),
            from_entity,
            to_entity,
            product: product.into(),
            unit_price,
            status: TransferStatus::Pending,
            week_key: week_key.into(),
            created_at: now,
        }
    }
}
