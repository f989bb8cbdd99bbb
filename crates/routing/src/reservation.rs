//! Backlog reservation.
//!
//! Replacement candidates are claimed with a conditional status update,
//! so two concurrent reservations for the same lead produce exactly one
//! winner. Losing simply means moving on to the next candidate; the
//! service never fabricates a lead when the pool is empty.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use leadflow_core::domain::commande::Commande;
use leadflow_core::domain::lead::{Lead, LeadStatus};
use leadflow_core::errors::ApplicationError;
use leadflow_db::repositories::{BacklogCandidateQuery, LeadRepository};

use crate::duplicate::DuplicateDetector;
use crate::persistence;

pub struct BacklogReservationService {
    leads: Arc<dyn LeadRepository>,
    duplicates: Arc<DuplicateDetector>,
    /// How many candidates to examine before giving up.
    candidate_window: u32,
}

impl BacklogReservationService {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        duplicates: Arc<DuplicateDetector>,
        candidate_window: u32,
    ) -> Self {
        Self { leads, duplicates, candidate_window }
    }

    /// Reserve the oldest suitable backlog lead to stand in for `trigger`
    /// on `order`. Returns the reserved lead, or None when the pool is
    /// exhausted.
    pub async fn reserve_replacement(
        &self,
        trigger: &Lead,
        order: &Commande,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, ApplicationError> {
        let query = BacklogCandidateQuery {
            entity: trigger.entity,
            product: trigger.product.clone(),
            exclude_lead_id: trigger.id.clone(),
            limit: self.candidate_window,
        };
        let candidates = self.leads.find_backlog_candidates(&query).await.map_err(persistence)?;

        for candidate in candidates {
            let department_covered = candidate
                .department
                .as_deref()
                .is_some_and(|department| order.departments.covers(department));
            if !department_covered {
                continue;
            }

            let duplicate = self
                .duplicates
                .check_duplicate_for_client(
                    candidate.entity,
                    &candidate.phone,
                    &candidate.product,
                    &order.client_id,
                    now,
                )
                .await?;
            if duplicate.is_some() {
                debug!(
                    event_name = "backlog.candidate_skipped_duplicate",
                    lead_id = %candidate.id.0,
                    client_id = %order.client_id,
                    "candidate already served to target client in last 30 days"
                );
                continue;
            }

            let won = self
                .leads
                .try_reserve_for_replacement(&candidate.id, now)
                .await
                .map_err(persistence)?;
            if !won {
                // Another reservation got there first; keep scanning.
                continue;
            }

            let mut reserved = candidate;
            reserved.status = LeadStatus::ReservedForReplacement;
            reserved.updated_at = now;
            return Ok(Some(reserved));
        }

        Ok(None)
    }
}
