//! In-memory repository implementations with the same conditional-update
//! semantics as the SQL versions. Used by service tests and local tooling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::commande::{Commande, CommandeId};
use leadflow_core::domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::{Lead, LeadId, LeadStatus};
use leadflow_core::domain::transfer::IntercompanyTransfer;

use super::{
    BacklogCandidateQuery, ClientRepository, CommandeRepository, DeliveredLeadRecord,
    DeliveryRepository, LeadRepository, RepositoryError, SentFields, SettingsRepository,
    TransferRepository, WeeklyCounts,
};

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.leads.read().await.get(&id.0).cloned())
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        self.leads.write().await.insert(lead.id.0.clone(), lead);
        Ok(())
    }

    async fn exists_double_submit(
        &self,
        session_id: &str,
        phone: &str,
        exclude: &LeadId,
        submitted_after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.leads.read().await.values().any(|lead| {
            lead.id != *exclude
                && lead.session_id.as_deref() == Some(session_id)
                && lead.phone == phone
                && lead.created_at >= submitted_after
        }))
    }

    async fn find_delivered_since(
        &self,
        entity: Entity,
        phone: &str,
        product: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveredLeadRecord>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut hits: Vec<DeliveredLeadRecord> = leads
            .values()
            .filter(|lead| {
                lead.entity == entity
                    && lead.phone == phone
                    && lead.product == product
                    && lead.status == LeadStatus::Livre
            })
            .filter_map(|lead| {
                let client_id = lead.delivered_to_client_id.clone()?;
                let delivered_at = lead.delivered_at.filter(|at| *at >= since)?;
                Some(DeliveredLeadRecord { lead_id: lead.id.clone(), client_id, delivered_at })
            })
            .collect();
        hits.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
        Ok(hits)
    }

    async fn find_backlog_candidates(
        &self,
        query: &BacklogCandidateQuery,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut candidates: Vec<Lead> = leads
            .values()
            .filter(|lead| {
                lead.entity == query.entity
                    && lead.product == query.product
                    && lead.is_backlog
                    && lead.status.is_backlog_available()
                    && lead.id != query.exclude_lead_id
                    && !lead.phone.is_empty()
                    && lead.department.as_deref().is_some_and(|dept| !dept.is_empty())
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        candidates.truncate(query.limit as usize);
        Ok(candidates)
    }

    async fn try_reserve_for_replacement(
        &self,
        id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&id.0) {
            Some(lead) if lead.is_backlog && lead.status.is_backlog_available() => {
                lead.status = LeadStatus::ReservedForReplacement;
                lead.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn weekly_counts(
        &self,
        commande_id: &CommandeId,
        week_start: DateTime<Utc>,
    ) -> Result<WeeklyCounts, RepositoryError> {
        let leads = self.leads.read().await;
        let mut counts = WeeklyCounts::default();
        for lead in leads.values() {
            let consumed = lead.delivery_commande_id.as_deref() == Some(commande_id.0.as_str())
                && matches!(lead.status, LeadStatus::Routed | LeadStatus::Livre)
                && lead.routed_at.is_some_and(|at| at >= week_start);
            if consumed {
                counts.delivered += 1;
                if lead.is_backlog {
                    counts.backlog += 1;
                }
            }
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct InMemoryCommandeRepository {
    commandes: RwLock<HashMap<String, Commande>>,
}

#[async_trait::async_trait]
impl CommandeRepository for InMemoryCommandeRepository {
    async fn find_by_id(&self, id: &CommandeId) -> Result<Option<Commande>, RepositoryError> {
        Ok(self.commandes.read().await.get(&id.0).cloned())
    }

    async fn save(&self, commande: Commande) -> Result<(), RepositoryError> {
        self.commandes.write().await.insert(commande.id.0.clone(), commande);
        Ok(())
    }

    async fn find_active(
        &self,
        entity: Entity,
        product: &str,
    ) -> Result<Vec<Commande>, RepositoryError> {
        let commandes = self.commandes.read().await;
        let mut active: Vec<Commande> = commandes
            .values()
            .filter(|order| order.entity == entity && order.product == product && order.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryRepository {
    deliveries: RwLock<HashMap<String, Delivery>>,
}

#[async_trait::async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn find_by_id(&self, id: &DeliveryId) -> Result<Option<Delivery>, RepositoryError> {
        Ok(self.deliveries.read().await.get(&id.0).cloned())
    }

    async fn save(&self, delivery: Delivery) -> Result<(), RepositoryError> {
        self.deliveries.write().await.insert(delivery.id.0.clone(), delivery);
        Ok(())
    }

    async fn list_by_status(
        &self,
        entity: Entity,
        status: DeliveryStatus,
    ) -> Result<Vec<Delivery>, RepositoryError> {
        let deliveries = self.deliveries.read().await;
        let mut matching: Vec<Delivery> = deliveries
            .values()
            .filter(|delivery| delivery.entity == entity && delivery.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn any_sent_to_clients_since(
        &self,
        client_ids: &[ClientId],
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.values().any(|delivery| {
            delivery.status == DeliveryStatus::Sent
                && delivery.last_sent_at.is_some_and(|at| at >= since)
                && client_ids.iter().any(|client| client.0 == delivery.client_id)
        }))
    }

    async fn set_ready_to_send(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        csv_content: &str,
        csv_filename: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id.0) {
            Some(delivery) if delivery.status == from => {
                delivery.status = DeliveryStatus::ReadyToSend;
                delivery.csv_content = Some(csv_content.to_string());
                delivery.csv_filename = Some(csv_filename.to_string());
                delivery.csv_generated_at = Some(now);
                delivery.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_sending(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id.0) {
            Some(delivery) if delivery.status == from => {
                delivery.status = DeliveryStatus::Sending;
                delivery.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_sent(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        fields: &SentFields,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id.0) {
            Some(delivery) if delivery.status == from => {
                delivery.status = DeliveryStatus::Sent;
                delivery.sent_to = fields.sent_to.clone();
                delivery.last_sent_at = Some(fields.sent_at);
                delivery.send_attempts = fields.send_attempts;
                delivery.sent_by = fields.sent_by.clone();
                delivery.last_error = None;
                delivery.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_failed(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        error: &str,
        increment_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries.get_mut(&id.0) {
            Some(delivery) if delivery.status == from => {
                delivery.status = DeliveryStatus::Failed;
                delivery.last_error = Some(error.to_string());
                if increment_attempts {
                    delivery.send_attempts += 1;
                }
                delivery.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<String, Client>>,
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        Ok(self.clients.read().await.get(&id.0).cloned())
    }

    async fn save(&self, client: Client) -> Result<(), RepositoryError> {
        self.clients.write().await.insert(client.id.0.clone(), client);
        Ok(())
    }

    async fn list_active_by_entity(&self, entity: Entity) -> Result<Vec<Client>, RepositoryError> {
        let clients = self.clients.read().await;
        let mut active: Vec<Client> = clients
            .values()
            .filter(|client| client.entity == entity && client.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemoryTransferRepository {
    transfers: RwLock<Vec<IntercompanyTransfer>>,
}

#[async_trait::async_trait]
impl TransferRepository for InMemoryTransferRepository {
    async fn insert_if_absent(
        &self,
        transfer: IntercompanyTransfer,
    ) -> Result<bool, RepositoryError> {
        let mut transfers = self.transfers.write().await;
        if transfers.iter().any(|existing| existing.delivery_id == transfer.delivery_id) {
            return Ok(false);
        }
        transfers.push(transfer);
        Ok(true)
    }

    async fn find_by_delivery_id(
        &self,
        delivery_id: &str,
    ) -> Result<Option<IntercompanyTransfer>, RepositoryError> {
        let transfers = self.transfers.read().await;
        Ok(transfers.iter().find(|transfer| transfer.delivery_id == delivery_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    settings: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.settings.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::lead::{Lead, LeadStatus, NewLead};

    use super::InMemoryLeadRepository;
    use crate::repositories::LeadRepository;

    fn backlog_lead(phone: &str) -> Lead {
        let mut lead = Lead::create(
            NewLead {
                entity: Entity::Zr7,
                phone: phone.to_string(),
                product: "PV".to_string(),
                department: Some("75".to_string()),
                session_id: None,
            },
            Utc::now(),
        )
        .expect("valid lead");
        lead.is_backlog = true;
        lead.status = LeadStatus::NoOpenOrders;
        lead
    }

    #[tokio::test]
    async fn concurrent_reservations_have_exactly_one_winner() {
        let repo = Arc::new(InMemoryLeadRepository::default());
        let lead = backlog_lead("0611111111");
        repo.save(lead.clone()).await.expect("save");

        let a = {
            let repo = Arc::clone(&repo);
            let id = lead.id.clone();
            tokio::spawn(async move { repo.try_reserve_for_replacement(&id, Utc::now()).await })
        };
        let b = {
            let repo = Arc::clone(&repo);
            let id = lead.id.clone();
            tokio::spawn(async move { repo.try_reserve_for_replacement(&id, Utc::now()).await })
        };

        let first = a.await.expect("join").expect("reserve");
        let second = b.await.expect("join").expect("reserve");

        assert!(first ^ second, "exactly one reservation may win");
    }
}
