use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::entity::Entity;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandeId(pub String);

/// Which departments an order accepts leads from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepartmentScope {
    /// Wildcard: any department, including leads with none recorded.
    All,
    List(Vec<String>),
}

impl DepartmentScope {
    pub fn covers(&self, department: &str) -> bool {
        match self {
            Self::All => true,
            Self::List(departments) => departments.iter().any(|value| value == department),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// A client's standing purchase configuration ("commande"). One order
/// covers exactly one product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commande {
    pub id: CommandeId,
    pub entity: Entity,
    pub client_id: String,
    pub product: String,
    pub departments: DepartmentScope,
    /// Maximum units accepted per ISO week; 0 means unlimited.
    pub weekly_quota: u32,
    pub price: Decimal,
    /// Target/cap share of delivered units drawn from backlog, in [0, 1].
    pub backlog_pct: f64,
    /// Lower rank is served first.
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Commande {
    pub fn accepts_backlog(&self) -> bool {
        self.backlog_pct > 0.0
    }

    pub fn quota_remaining(&self, delivered_this_week: u32) -> Option<u32> {
        if self.weekly_quota == 0 {
            return None;
        }
        Some(self.weekly_quota.saturating_sub(delivered_this_week))
    }
}
