//! Intercompany transfer trigger.
//!
//! When a delivery reaches `sent` and the lead was captured by the other
//! entity, the selling side owes the capturing side for the unit. The
//! trigger writes one `pending` ledger entry per delivery; re-firing for
//! the same delivery is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use leadflow_core::domain::delivery::Delivery;
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::transfer::IntercompanyTransfer;
use leadflow_core::errors::ApplicationError;
use leadflow_core::week::week_key;
use leadflow_db::repositories::{LeadRepository, TransferRepository};

use crate::persistence;

/// Pricing collaborator for cross-entity units.
pub trait TransferPricing: Send + Sync {
    fn unit_price(&self, from: Entity, to: Entity, product: &str) -> Decimal;
}

/// Fixed per-unit price regardless of direction or product. The default
/// is zero: transfers are recorded for reconciliation even before a price
/// sheet is agreed.
#[derive(Clone, Debug, Default)]
pub struct FlatTransferPricing {
    pub unit_price: Decimal,
}

impl TransferPricing for FlatTransferPricing {
    fn unit_price(&self, _from: Entity, _to: Entity, _product: &str) -> Decimal {
        self.unit_price
    }
}

pub struct TransferTrigger {
    transfers: Arc<dyn TransferRepository>,
    leads: Arc<dyn LeadRepository>,
    pricing: Arc<dyn TransferPricing>,
}

impl TransferTrigger {
    pub fn new(
        transfers: Arc<dyn TransferRepository>,
        leads: Arc<dyn LeadRepository>,
        pricing: Arc<dyn TransferPricing>,
    ) -> Self {
        Self { transfers, leads, pricing }
    }

    /// Fire after a delivery reaches `sent`. Returns the transfer created,
    /// or None when the delivery is same-entity or already has one.
    pub async fn on_delivery_sent(
        &self,
        delivery: &Delivery,
        now: DateTime<Utc>,
    ) -> Result<Option<IntercompanyTransfer>, ApplicationError> {
        let Some(cross_entity_lead) = self.first_cross_entity_lead(delivery).await? else {
            return Ok(None);
        };

        let from_entity = cross_entity_lead.1;
        let to_entity = delivery.entity;
        let unit_price = self.pricing.unit_price(from_entity, to_entity, &delivery.product);

        let transfer = IntercompanyTransfer::pending(
            cross_entity_lead.0,
            delivery.id.0.clone(),
            delivery.commande_id.clone(),
            from_entity,
            to_entity,
            delivery.product.clone(),
            unit_price,
            week_key(now),
            now,
        );

        let created =
            self.transfers.insert_if_absent(transfer.clone()).await.map_err(persistence)?;
        if !created {
            return Ok(None);
        }

        info!(
            event_name = "transfer.created",
            delivery_id = %delivery.id.0,
            from_entity = from_entity.as_str(),
            to_entity = to_entity.as_str(),
            product = %delivery.product,
            week_key = %transfer.week_key,
        );
        Ok(Some(transfer))
    }

    async fn first_cross_entity_lead(
        &self,
        delivery: &Delivery,
    ) -> Result<Option<(String, Entity)>, ApplicationError> {
        for lead_id in &delivery.lead_ids {
            let Some(lead) = self.leads.find_by_id(lead_id).await.map_err(persistence)? else {
                return Err(ApplicationError::not_found("lead", lead_id.0.clone()));
            };
            if lead.entity != delivery.entity {
                return Ok(Some((lead.id.0, lead.entity)));
            }
        }
        Ok(None)
    }
}
