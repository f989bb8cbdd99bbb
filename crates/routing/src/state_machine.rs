//! Delivery state machine.
//!
//! The legal-transition table lives on `DeliveryStatus`; this service
//! enforces it against the datastore. Every transition is a conditional
//! update on the current status, so a stale caller loses instead of
//! overwriting a concurrent move.
//!
//! `mark_sent` is the only code path that writes delivery `sent` and lead
//! `livre`. The delivery row is written first, then the lead rows; there
//! is no multi-table transaction, so a crash between the two leaves a
//! sent delivery with still-routed leads, which the next dispatch run can
//! reconcile from the delivery record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use leadflow_core::domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
use leadflow_core::domain::lead::LeadStatus;
use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_db::repositories::{DeliveryRepository, LeadRepository, SentFields};

use crate::persistence;

/// Per-delivery payload for `mark_ready_to_send_batch`.
#[derive(Clone, Debug)]
pub struct CsvReadyItem {
    pub id: DeliveryId,
    pub csv_content: String,
    pub csv_filename: String,
}

/// Per-delivery payload for `mark_sent_batch`.
#[derive(Clone, Debug)]
pub struct SentItem {
    pub id: DeliveryId,
    pub recipients: Vec<String>,
    pub sent_by: Option<String>,
}

pub struct DeliveryStateMachine {
    deliveries: Arc<dyn DeliveryRepository>,
    leads: Arc<dyn LeadRepository>,
}

impl DeliveryStateMachine {
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, leads: Arc<dyn LeadRepository>) -> Self {
        Self { deliveries, leads }
    }

    pub async fn mark_ready_to_send(
        &self,
        id: &DeliveryId,
        csv_content: &str,
        csv_filename: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ApplicationError> {
        let delivery = self.load(id).await?;
        check_transition(&delivery, DeliveryStatus::ReadyToSend)?;

        let applied = self
            .deliveries
            .set_ready_to_send(id, delivery.status, csv_content, csv_filename, now)
            .await
            .map_err(persistence)?;
        if !applied {
            return Err(concurrent_update(id));
        }

        self.load(id).await
    }

    pub async fn mark_sending(
        &self,
        id: &DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ApplicationError> {
        let delivery = self.load(id).await?;
        check_transition(&delivery, DeliveryStatus::Sending)?;

        let applied =
            self.deliveries.set_sending(id, delivery.status, now).await.map_err(persistence)?;
        if !applied {
            return Err(concurrent_update(id));
        }

        self.load(id).await
    }

    /// Marks the delivery sent and its leads delivered. The sent
    /// invariants are validated before anything is written; a rejection
    /// leaves the datastore untouched.
    pub async fn mark_sent(
        &self,
        id: &DeliveryId,
        recipients: Vec<String>,
        sent_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ApplicationError> {
        let delivery = self.load(id).await?;
        check_transition(&delivery, DeliveryStatus::Sent)?;

        let send_attempts = delivery.send_attempts + 1;
        Delivery::validate_sent_fields(id, &recipients, Some(now), send_attempts).map_err(
            |violation| {
                error!(
                    event_name = "delivery.sent_invariant_rejected",
                    delivery_id = %id.0,
                    error = %violation,
                    "refusing to mark delivery sent"
                );
                violation
            },
        )?;

        let fields = SentFields {
            sent_to: recipients,
            sent_at: now,
            send_attempts,
            sent_by,
        };
        let applied = self
            .deliveries
            .set_sent(id, delivery.status, &fields, now)
            .await
            .map_err(persistence)?;
        if !applied {
            return Err(concurrent_update(id));
        }

        for lead_id in &delivery.lead_ids {
            let Some(mut lead) = self.leads.find_by_id(lead_id).await.map_err(persistence)? else {
                return Err(ApplicationError::not_found("lead", lead_id.0.clone()));
            };
            lead.status = LeadStatus::Livre;
            lead.delivered_to_client_id = Some(delivery.client_id.clone());
            lead.delivered_at = Some(now);
            lead.delivery_id = Some(id.0.clone());
            lead.updated_at = now;
            self.leads.save(lead).await.map_err(persistence)?;
        }

        info!(
            event_name = "delivery.sent",
            delivery_id = %id.0,
            client_id = %delivery.client_id,
            lead_count = delivery.lead_ids.len(),
            send_attempts,
        );
        self.load(id).await
    }

    pub async fn mark_failed(
        &self,
        id: &DeliveryId,
        error_message: &str,
        increment_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ApplicationError> {
        let delivery = self.load(id).await?;
        check_transition(&delivery, DeliveryStatus::Failed)?;

        let applied = self
            .deliveries
            .set_failed(id, delivery.status, error_message, increment_attempts, now)
            .await
            .map_err(persistence)?;
        if !applied {
            return Err(concurrent_update(id));
        }

        self.load(id).await
    }

    /// Batch variants verify every member's source state before touching
    /// any row: one mismatch rejects the whole batch.
    pub async fn mark_sending_batch(
        &self,
        ids: &[DeliveryId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, ApplicationError> {
        for id in ids {
            let delivery = self.load(id).await?;
            check_transition(&delivery, DeliveryStatus::Sending)?;
        }

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.mark_sending(id, now).await?);
        }
        Ok(updated)
    }

    pub async fn mark_ready_to_send_batch(
        &self,
        items: &[CsvReadyItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, ApplicationError> {
        for item in items {
            let delivery = self.load(&item.id).await?;
            check_transition(&delivery, DeliveryStatus::ReadyToSend)?;
        }

        let mut updated = Vec::with_capacity(items.len());
        for item in items {
            updated.push(
                self.mark_ready_to_send(&item.id, &item.csv_content, &item.csv_filename, now)
                    .await?,
            );
        }
        Ok(updated)
    }

    pub async fn mark_sent_batch(
        &self,
        items: &[SentItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, ApplicationError> {
        for item in items {
            let delivery = self.load(&item.id).await?;
            check_transition(&delivery, DeliveryStatus::Sent)?;
            Delivery::validate_sent_fields(
                &item.id,
                &item.recipients,
                Some(now),
                delivery.send_attempts + 1,
            )?;
        }

        let mut updated = Vec::with_capacity(items.len());
        for item in items {
            updated.push(
                self.mark_sent(&item.id, item.recipients.clone(), item.sent_by.clone(), now)
                    .await?,
            );
        }
        Ok(updated)
    }

    pub async fn mark_failed_batch(
        &self,
        ids: &[DeliveryId],
        error_message: &str,
        increment_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, ApplicationError> {
        for id in ids {
            let delivery = self.load(id).await?;
            check_transition(&delivery, DeliveryStatus::Failed)?;
        }

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.mark_failed(id, error_message, increment_attempts, now).await?);
        }
        Ok(updated)
    }

    async fn load(&self, id: &DeliveryId) -> Result<Delivery, ApplicationError> {
        self.deliveries
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("delivery", id.0.clone()))
    }
}

fn check_transition(delivery: &Delivery, to: DeliveryStatus) -> Result<(), DomainError> {
    if delivery.status.is_terminal() {
        return Err(DomainError::TerminalDelivery {
            delivery_id: delivery.id.0.clone(),
            attempted: to,
        });
    }
    if !delivery.status.can_transition_to(to) {
        return Err(DomainError::InvalidDeliveryTransition {
            delivery_id: delivery.id.0.clone(),
            from: delivery.status,
            to,
            allowed: delivery.status.allowed_transitions().to_vec(),
        });
    }
    Ok(())
}

fn concurrent_update(id: &DeliveryId) -> ApplicationError {
    ApplicationError::Persistence(format!("delivery {} was modified concurrently", id.0))
}
