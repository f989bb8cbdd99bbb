use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::Entity;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

/// A buyer of leads, scoped to one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub entity: Entity,
    pub name: String,
    /// Destination addresses for CSV delivery.
    pub emails: Vec<String>,
    pub active: bool,
    /// When off, completed CSVs are held at ready_to_send for manual review.
    pub auto_send_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Overlap "group key": sorted, deduplicated, lowercased delivery
    /// addresses joined by `|`. Two clients with the same key are treated
    /// as the same real-world company. Empty emails yield an empty key, so
    /// no group and no overlap possible.
    pub fn email_group_key(&self) -> String {
        let mut normalized: Vec<String> = self
            .emails
            .iter()
            .map(|address| address.trim().to_ascii_lowercase())
            .filter(|address| !address.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        normalized.join("|")
    }
}
