//! Duplicate suppression: the 5-second double-submit window and the
//! trailing 30-day per-client delivery check.
//!
//! Everything here is read-only. Callers decide what to do with a hit;
//! the detector never mutates a lead.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::{Lead, LeadId};
use leadflow_core::errors::ApplicationError;
use leadflow_core::week::{double_submit_window_start, duplicate_window_start};
use leadflow_db::repositories::{ClientRepository, LeadRepository};

use crate::persistence;

/// Audit record for a 30-day duplicate: which prior lead was already
/// delivered, to whom, and when.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateHit {
    pub prior_lead_id: LeadId,
    pub client_id: String,
    pub client_name: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

pub struct DuplicateDetector {
    leads: Arc<dyn LeadRepository>,
    clients: Arc<dyn ClientRepository>,
}

impl DuplicateDetector {
    pub fn new(leads: Arc<dyn LeadRepository>, clients: Arc<dyn ClientRepository>) -> Self {
        Self { leads, clients }
    }

    /// Same session and phone submitted within the last 5 seconds. Leads
    /// without a session id can never double-submit.
    pub async fn is_double_submit(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<bool, ApplicationError> {
        let Some(session_id) = lead.session_id.as_deref() else {
            return Ok(false);
        };
        if lead.phone.is_empty() {
            return Ok(false);
        }

        self.leads
            .exists_double_submit(session_id, &lead.phone, &lead.id, double_submit_window_start(now))
            .await
            .map_err(persistence)
    }

    /// Was this phone+product already delivered to `client_id` in the
    /// trailing 30 days? Empty phone or product never counts as a
    /// duplicate.
    pub async fn check_duplicate_for_client(
        &self,
        entity: Entity,
        phone: &str,
        product: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DuplicateHit>, ApplicationError> {
        if phone.is_empty() || product.is_empty() {
            return Ok(None);
        }

        let delivered = self
            .leads
            .find_delivered_since(entity, phone, product, duplicate_window_start(now))
            .await
            .map_err(persistence)?;

        let Some(record) = delivered.into_iter().find(|record| record.client_id == client_id)
        else {
            return Ok(None);
        };

        let client_name = self
            .clients
            .find_by_id(&leadflow_core::domain::client::ClientId(record.client_id.clone()))
            .await
            .map_err(persistence)?
            .map(|client| client.name);

        Ok(Some(DuplicateHit {
            prior_lead_id: record.lead_id,
            client_id: record.client_id,
            client_name,
            delivered_at: record.delivered_at,
        }))
    }

    /// Every client of the entity that already received this phone+product
    /// in the trailing 30 days, newest delivery first.
    pub async fn check_duplicate_for_any_client(
        &self,
        entity: Entity,
        phone: &str,
        product: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DuplicateHit>, ApplicationError> {
        if phone.is_empty() || product.is_empty() {
            return Ok(Vec::new());
        }

        let delivered = self
            .leads
            .find_delivered_since(entity, phone, product, duplicate_window_start(now))
            .await
            .map_err(persistence)?;

        let mut hits = Vec::with_capacity(delivered.len());
        let mut seen = std::collections::HashSet::new();
        for record in delivered {
            if !seen.insert(record.client_id.clone()) {
                continue;
            }
            hits.push(DuplicateHit {
                prior_lead_id: record.lead_id,
                client_id: record.client_id,
                client_name: None,
                delivered_at: record.delivered_at,
            });
        }
        Ok(hits)
    }
}
