//! Batch dispatcher.
//!
//! One run per entity: render CSVs for freshly routed deliveries, send
//! everything that is ready, retry what previously failed. Retry state
//! lives entirely on the delivery rows (`send_attempts`, `last_error`);
//! the dispatcher keeps no memory between runs, so a crashed run loses
//! nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use leadflow_core::csv::{delivery_filename, render_delivery_csv};
use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::delivery::{Delivery, DeliveryStatus};
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::Lead;
use leadflow_core::errors::ApplicationError;
use leadflow_db::repositories::{ClientRepository, DeliveryRepository, LeadRepository};
use leadflow_routing::state_machine::DeliveryStateMachine;
use leadflow_routing::transfer::TransferTrigger;

use crate::calendar::DeliveryCalendar;
use crate::persistence;
use crate::transport::{EmailTransport, OutboundCsv};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Failed deliveries at or beyond this attempt count need manual
    /// intervention.
    pub max_send_attempts: u32,
    pub sent_by: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_send_attempts: 3, sent_by: Some("dispatcher".to_string()) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub rendered: u32,
    pub sent: u32,
    /// Held at `ready_to_send` because the client's auto-send is off.
    pub held: u32,
    pub failed: u32,
    /// Set when the delivery-day gate stopped the run.
    pub skipped: Option<String>,
}

pub struct CsvBatchDispatcher {
    deliveries: Arc<dyn DeliveryRepository>,
    clients: Arc<dyn ClientRepository>,
    leads: Arc<dyn LeadRepository>,
    machine: DeliveryStateMachine,
    transfers: TransferTrigger,
    calendar: DeliveryCalendar,
    transport: Arc<dyn EmailTransport>,
    config: DispatcherConfig,
}

impl CsvBatchDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deliveries: Arc<dyn DeliveryRepository>,
        clients: Arc<dyn ClientRepository>,
        leads: Arc<dyn LeadRepository>,
        machine: DeliveryStateMachine,
        transfers: TransferTrigger,
        calendar: DeliveryCalendar,
        transport: Arc<dyn EmailTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self { deliveries, clients, leads, machine, transfers, calendar, transport, config }
    }

    /// One dispatch pass for an entity.
    pub async fn run(
        &self,
        entity: Entity,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ApplicationError> {
        let gate = self.calendar.is_delivery_day_enabled(entity, now).await?;
        if !gate.enabled {
            let reason = gate.reason.unwrap_or_else(|| "delivery day disabled".to_string());
            info!(
                event_name = "dispatch.skipped",
                entity = entity.as_str(),
                reason = %reason,
            );
            return Ok(DispatchReport { skipped: Some(reason), ..DispatchReport::default() });
        }

        let mut report = DispatchReport::default();

        for delivery in self
            .deliveries
            .list_by_status(entity, DeliveryStatus::PendingCsv)
            .await
            .map_err(persistence)?
        {
            match self.render(&delivery, now).await {
                Ok(()) => report.rendered += 1,
                Err(error) => {
                    warn!(
                        event_name = "dispatch.render_failed",
                        delivery_id = %delivery.id.0,
                        error = %error,
                    );
                    self.machine
                        .mark_failed(&delivery.id, &error.to_string(), false, now)
                        .await?;
                    report.failed += 1;
                }
            }
        }

        for delivery in self
            .deliveries
            .list_by_status(entity, DeliveryStatus::ReadyToSend)
            .await
            .map_err(persistence)?
        {
            self.send_one(&delivery, now, &mut report).await?;
        }

        for delivery in self
            .deliveries
            .list_by_status(entity, DeliveryStatus::Failed)
            .await
            .map_err(persistence)?
        {
            if delivery.send_attempts >= self.config.max_send_attempts {
                warn!(
                    event_name = "dispatch.retries_exhausted",
                    delivery_id = %delivery.id.0,
                    send_attempts = delivery.send_attempts,
                    last_error = delivery.last_error.as_deref().unwrap_or(""),
                );
                continue;
            }
            if delivery.csv_content.is_none() {
                // Failed before rendering; the next run picks it up once
                // it is requeued manually.
                continue;
            }
            self.send_one(&delivery, now, &mut report).await?;
        }

        info!(
            event_name = "dispatch.completed",
            entity = entity.as_str(),
            rendered = report.rendered,
            sent = report.sent,
            held = report.held,
            failed = report.failed,
        );
        Ok(report)
    }

    async fn render(
        &self,
        delivery: &Delivery,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let client = self.load_client(&delivery.client_id).await?;
        let mut leads = Vec::with_capacity(delivery.lead_ids.len());
        for lead_id in &delivery.lead_ids {
            leads.push(self.load_lead_row(lead_id).await?);
        }

        let content = render_delivery_csv(&leads, &delivery.product)
            .map_err(|error| ApplicationError::Integration(error.to_string()))?;
        let filename = delivery_filename(&client.name, &delivery.product, now);

        self.machine.mark_ready_to_send(&delivery.id, &content, &filename, now).await?;
        Ok(())
    }

    async fn send_one(
        &self,
        delivery: &Delivery,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), ApplicationError> {
        let client = self.load_client(&delivery.client_id).await?;
        if !client.auto_send_enabled && delivery.status == DeliveryStatus::ReadyToSend {
            info!(
                event_name = "dispatch.held_for_review",
                delivery_id = %delivery.id.0,
                client_id = %client.id.0,
            );
            report.held += 1;
            return Ok(());
        }

        let (Some(csv_content), Some(csv_filename)) =
            (delivery.csv_content.clone(), delivery.csv_filename.clone())
        else {
            self.machine
                .mark_failed(&delivery.id, "delivery has no rendered csv", false, now)
                .await?;
            report.failed += 1;
            return Ok(());
        };

        self.machine.mark_sending(&delivery.id, now).await?;

        let message = OutboundCsv {
            to: client.emails.clone(),
            subject: format!("Leads {} {}", delivery.product, now.format("%Y-%m-%d")),
            csv_filename,
            csv_content,
        };

        match self.transport.send_csv(&message).await {
            Ok(()) => {
                let sent = self
                    .machine
                    .mark_sent(&delivery.id, client.emails.clone(), self.config.sent_by.clone(), now)
                    .await?;
                report.sent += 1;
                if let Err(trigger_error) = self.transfers.on_delivery_sent(&sent, now).await {
                    // The delivery is already sent; the trigger re-fires
                    // idempotently on a later run.
                    error!(
                        event_name = "dispatch.transfer_trigger_failed",
                        delivery_id = %delivery.id.0,
                        error = %trigger_error,
                    );
                }
            }
            Err(transport_error) => {
                warn!(
                    event_name = "dispatch.send_failed",
                    delivery_id = %delivery.id.0,
                    client_id = %client.id.0,
                    error = %transport_error,
                );
                self.machine
                    .mark_failed(&delivery.id, &transport_error.to_string(), true, now)
                    .await?;
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn load_client(&self, client_id: &str) -> Result<Client, ApplicationError> {
        self.clients
            .find_by_id(&ClientId(client_id.to_string()))
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("client", client_id))
    }

    async fn load_lead_row(
        &self,
        lead_id: &leadflow_core::domain::lead::LeadId,
    ) -> Result<Lead, ApplicationError> {
        self.leads
            .find_by_id(lead_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("lead", lead_id.0.clone()))
    }
}
