//! Cross-entity overlap guard.
//!
//! Both entities sell into the same market, and a handful of buyers have
//! accounts on both sides under different names. The guard spots those via
//! a normalized email group key and steers the lead to an unshared client
//! when the shared one has taken cross-entity deliveries recently.
//!
//! The guard is advisory: it returns a decision, never an error. Any
//! internal failure or timeout degrades to "keep the original client" with
//! a warning, and a persisted setting can switch it off entirely.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::commande::Commande;
use leadflow_core::domain::lead::Lead;
use leadflow_core::errors::ApplicationError;
use leadflow_core::week::duplicate_window_start;
use leadflow_db::repositories::{
    ClientRepository, CommandeRepository, DeliveryRepository, SettingsRepository,
};

use crate::duplicate::DuplicateDetector;
use crate::persistence;

/// Kill switch; any value other than `"false"` (or no value) means on.
pub const OVERLAP_GUARD_ENABLED_KEY: &str = "overlap_guard.enabled";

/// How many alternative orders to examine before falling back.
const MAX_ALTERNATIVES: usize = 10;

#[derive(Clone, Debug)]
pub enum OverlapOutcome {
    KeepOriginal,
    Redirect { commande: Commande, client: Client },
}

pub struct OverlapGuard {
    clients: Arc<dyn ClientRepository>,
    commandes: Arc<dyn CommandeRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    settings: Arc<dyn SettingsRepository>,
    duplicates: Arc<DuplicateDetector>,
    timeout: Duration,
}

impl OverlapGuard {
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        commandes: Arc<dyn CommandeRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        settings: Arc<dyn SettingsRepository>,
        duplicates: Arc<DuplicateDetector>,
        timeout: Duration,
    ) -> Self {
        Self { clients, commandes, deliveries, settings, duplicates, timeout }
    }

    /// Decide whether `lead`, about to be assigned to `chosen`, should be
    /// redirected to an unshared client. Infallible by contract.
    pub async fn check(
        &self,
        lead: &Lead,
        chosen: &Commande,
        now: DateTime<Utc>,
    ) -> OverlapOutcome {
        match tokio::time::timeout(self.timeout, self.evaluate(lead, chosen, now)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(
                    event_name = "overlap.check_failed",
                    lead_id = %lead.id.0,
                    commande_id = %chosen.id.0,
                    error = %error,
                    "overlap guard failed, keeping original assignment"
                );
                OverlapOutcome::KeepOriginal
            }
            Err(_) => {
                warn!(
                    event_name = "overlap.check_timed_out",
                    lead_id = %lead.id.0,
                    commande_id = %chosen.id.0,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "overlap guard timed out, keeping original assignment"
                );
                OverlapOutcome::KeepOriginal
            }
        }
    }

    async fn evaluate(
        &self,
        lead: &Lead,
        chosen: &Commande,
        now: DateTime<Utc>,
    ) -> Result<OverlapOutcome, ApplicationError> {
        if !self.is_enabled().await? {
            return Ok(OverlapOutcome::KeepOriginal);
        }

        let Some(chosen_client) = self
            .clients
            .find_by_id(&ClientId(chosen.client_id.clone()))
            .await
            .map_err(persistence)?
        else {
            return Err(ApplicationError::not_found("client", chosen.client_id.clone()));
        };

        let group_key = chosen_client.email_group_key();
        if group_key.is_empty() {
            return Ok(OverlapOutcome::KeepOriginal);
        }

        let other_entity = lead.entity.other();
        let siblings: Vec<ClientId> = self
            .clients
            .list_active_by_entity(other_entity)
            .await
            .map_err(persistence)?
            .into_iter()
            .filter(|client| client.email_group_key() == group_key)
            .map(|client| client.id)
            .collect();
        if siblings.is_empty() {
            return Ok(OverlapOutcome::KeepOriginal);
        }

        let window_start = duplicate_window_start(now);
        let active = self
            .deliveries
            .any_sent_to_clients_since(&siblings, window_start)
            .await
            .map_err(persistence)?;
        if !active {
            return Ok(OverlapOutcome::KeepOriginal);
        }

        // Every same-entity client sharing the key is off limits too.
        let shared_here: HashSet<String> = self
            .clients
            .list_active_by_entity(lead.entity)
            .await
            .map_err(persistence)?
            .into_iter()
            .filter(|client| client.email_group_key() == group_key)
            .map(|client| client.id.0)
            .collect();

        let orders = self
            .commandes
            .find_active(lead.entity, &lead.product)
            .await
            .map_err(persistence)?;

        let alternatives = orders
            .into_iter()
            .filter(|order| order.id != chosen.id)
            .take(MAX_ALTERNATIVES);
        for order in alternatives {
            if shared_here.contains(&order.client_id) {
                continue;
            }
            let covered = match lead.department.as_deref() {
                Some(department) => order.departments.covers(department),
                None => order.departments.is_wildcard(),
            };
            if !covered {
                continue;
            }
            let duplicate = self
                .duplicates
                .check_duplicate_for_client(
                    lead.entity,
                    &lead.phone,
                    &lead.product,
                    &order.client_id,
                    now,
                )
                .await?;
            if duplicate.is_some() {
                continue;
            }
            let Some(client) = self
                .clients
                .find_by_id(&ClientId(order.client_id.clone()))
                .await
                .map_err(persistence)?
                .filter(|client| client.active)
            else {
                continue;
            };

            return Ok(OverlapOutcome::Redirect { commande: order, client });
        }

        // No unshared alternative: the original client still gets the lead.
        Ok(OverlapOutcome::KeepOriginal)
    }

    /// Current state of the kill switch.
    pub async fn is_enabled(&self) -> Result<bool, ApplicationError> {
        let value = self.settings.get(OVERLAP_GUARD_ENABLED_KEY).await.map_err(persistence)?;
        Ok(value.as_deref() != Some("false"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;

    use leadflow_core::domain::client::{Client, ClientId};
    use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
    use leadflow_core::domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::lead::{Lead, NewLead};
    use leadflow_db::repositories::{
        ClientRepository, CommandeRepository, DeliveryRepository, InMemoryClientRepository,
        InMemoryCommandeRepository, InMemoryDeliveryRepository, InMemoryLeadRepository,
        InMemorySettingsRepository, LeadRepository, RepositoryError, SentFields,
        SettingsRepository,
    };

    use super::{OverlapGuard, OverlapOutcome, OVERLAP_GUARD_ENABLED_KEY};
    use crate::duplicate::DuplicateDetector;

    struct Fixture {
        clients: Arc<InMemoryClientRepository>,
        commandes: Arc<InMemoryCommandeRepository>,
        deliveries: Arc<InMemoryDeliveryRepository>,
        settings: Arc<InMemorySettingsRepository>,
        leads: Arc<InMemoryLeadRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clients: Arc::new(InMemoryClientRepository::default()),
                commandes: Arc::new(InMemoryCommandeRepository::default()),
                deliveries: Arc::new(InMemoryDeliveryRepository::default()),
                settings: Arc::new(InMemorySettingsRepository::default()),
                leads: Arc::new(InMemoryLeadRepository::default()),
            }
        }

        fn guard(&self) -> OverlapGuard {
            self.guard_with_deliveries(Arc::clone(&self.deliveries) as Arc<dyn DeliveryRepository>)
        }

        fn guard_with_deliveries(&self, deliveries: Arc<dyn DeliveryRepository>) -> OverlapGuard {
            let duplicates = DuplicateDetector::new(
                Arc::clone(&self.leads) as Arc<dyn LeadRepository>,
                Arc::clone(&self.clients) as Arc<dyn ClientRepository>,
            );
            OverlapGuard::new(
                Arc::clone(&self.clients) as Arc<dyn ClientRepository>,
                Arc::clone(&self.commandes) as Arc<dyn CommandeRepository>,
                deliveries,
                Arc::clone(&self.settings) as Arc<dyn SettingsRepository>,
                Arc::new(duplicates),
                Duration::from_millis(500),
            )
        }
    }

    fn client(id: &str, entity: Entity, emails: &[&str]) -> Client {
        Client {
            id: ClientId(id.to_string()),
            entity,
            name: format!("Client {id}"),
            emails: emails.iter().map(|email| email.to_string()).collect(),
            active: true,
            auto_send_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(id: &str, client_id: &str, priority: i32) -> Commande {
        Commande {
            id: CommandeId(id.to_string()),
            entity: Entity::Zr7,
            client_id: client_id.to_string(),
            product: "PV".to_string(),
            departments: DepartmentScope::All,
            weekly_quota: 0,
            price: Decimal::new(3500, 2),
            backlog_pct: 0.0,
            priority,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn lead() -> Lead {
        Lead::create(
            NewLead {
                entity: Entity::Zr7,
                phone: "0612345678".to_string(),
                product: "PV".to_string(),
                department: Some("75".to_string()),
                session_id: None,
            },
            Utc::now(),
        )
        .expect("valid lead")
    }

    async fn sent_delivery(
        deliveries: &InMemoryDeliveryRepository,
        client_id: &str,
        sent_at: DateTime<Utc>,
    ) {
        let mut delivery = Delivery::create(
            Entity::Mdl,
            client_id,
            "C-X",
            vec![leadflow_core::domain::lead::LeadId("L-X".to_string())],
            "PV",
            sent_at - ChronoDuration::hours(1),
        )
        .expect("valid delivery");
        delivery.status = DeliveryStatus::Sent;
        delivery.sent_to = vec!["ops@shared.fr".to_string()];
        delivery.last_sent_at = Some(sent_at);
        delivery.send_attempts = 1;
        deliveries.save(delivery).await.expect("save");
    }

    /// Shared buyer "ACME" on both entities, recent MDL activity, and one
    /// unshared ZR7 alternative.
    async fn overlapping_setup(fx: &Fixture) {
        fx.clients
            .save(client("ZR-ACME", Entity::Zr7, &["ops@shared.fr"]))
            .await
            .expect("save");
        fx.clients
            .save(client("MDL-ACME", Entity::Mdl, &["Ops@Shared.fr"]))
            .await
            .expect("save");
        fx.clients
            .save(client("ZR-OTHER", Entity::Zr7, &["leads@other.fr"]))
            .await
            .expect("save");

        fx.commandes.save(order("C-1", "ZR-ACME", 1)).await.expect("save");
        fx.commandes.save(order("C-2", "ZR-OTHER", 2)).await.expect("save");

        sent_delivery(&fx.deliveries, "MDL-ACME", Utc::now() - ChronoDuration::days(3)).await;
    }

    #[tokio::test]
    async fn redirects_to_an_unshared_client_on_recent_cross_entity_activity() {
        let fx = Fixture::new();
        overlapping_setup(&fx).await;

        let outcome = fx.guard().check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        match outcome {
            OverlapOutcome::Redirect { commande, client } => {
                assert_eq!(commande.id.0, "C-2");
                assert_eq!(client.id.0, "ZR-OTHER");
            }
            OverlapOutcome::KeepOriginal => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn stale_cross_entity_activity_keeps_the_original() {
        // The only MDL delivery sits outside the 30-day window.
        let fresh = Fixture::new();
        fresh.clients.save(client("ZR-ACME", Entity::Zr7, &["ops@shared.fr"])).await.expect("save");
        fresh.clients.save(client("MDL-ACME", Entity::Mdl, &["ops@shared.fr"])).await.expect("save");
        fresh.commandes.save(order("C-1", "ZR-ACME", 1)).await.expect("save");
        sent_delivery(&fresh.deliveries, "MDL-ACME", Utc::now() - ChronoDuration::days(45)).await;

        let outcome = fresh.guard().check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        assert!(matches!(outcome, OverlapOutcome::KeepOriginal));
    }

    #[tokio::test]
    async fn kill_switch_disables_the_guard() {
        let fx = Fixture::new();
        overlapping_setup(&fx).await;
        fx.settings.set(OVERLAP_GUARD_ENABLED_KEY, "false", Utc::now()).await.expect("set");

        let outcome = fx.guard().check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        assert!(matches!(outcome, OverlapOutcome::KeepOriginal));
    }

    #[tokio::test]
    async fn without_alternatives_the_original_client_is_kept() {
        // Only the shared client's order exists; the guard must fall back.
        let bare = Fixture::new();
        bare.clients.save(client("ZR-ACME", Entity::Zr7, &["ops@shared.fr"])).await.expect("save");
        bare.clients.save(client("MDL-ACME", Entity::Mdl, &["ops@shared.fr"])).await.expect("save");
        bare.commandes.save(order("C-1", "ZR-ACME", 1)).await.expect("save");
        sent_delivery(&bare.deliveries, "MDL-ACME", Utc::now() - ChronoDuration::days(3)).await;

        let outcome = bare.guard().check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        assert!(matches!(outcome, OverlapOutcome::KeepOriginal));
    }

    struct FailingDeliveryRepository;

    #[async_trait::async_trait]
    impl DeliveryRepository for FailingDeliveryRepository {
        async fn find_by_id(
            &self,
            _id: &DeliveryId,
        ) -> Result<Option<Delivery>, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn save(&self, _delivery: Delivery) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn list_by_status(
            &self,
            _entity: Entity,
            _status: DeliveryStatus,
        ) -> Result<Vec<Delivery>, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn any_sent_to_clients_since(
            &self,
            _client_ids: &[ClientId],
            _since: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn set_ready_to_send(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _csv_content: &str,
            _csv_filename: &str,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn set_sending(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn set_sent(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _fields: &SentFields,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
        async fn set_failed(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _error: &str,
            _increment_attempts: bool,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("injected failure".to_string()))
        }
    }

    struct SlowDeliveryRepository;

    #[async_trait::async_trait]
    impl DeliveryRepository for SlowDeliveryRepository {
        async fn find_by_id(
            &self,
            _id: &DeliveryId,
        ) -> Result<Option<Delivery>, RepositoryError> {
            Ok(None)
        }
        async fn save(&self, _delivery: Delivery) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_by_status(
            &self,
            _entity: Entity,
            _status: DeliveryStatus,
        ) -> Result<Vec<Delivery>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn any_sent_to_clients_since(
            &self,
            _client_ids: &[ClientId],
            _since: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(true)
        }
        async fn set_ready_to_send(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _csv_content: &str,
            _csv_filename: &str,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn set_sending(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn set_sent(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _fields: &SentFields,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn set_failed(
            &self,
            _id: &DeliveryId,
            _from: DeliveryStatus,
            _error: &str,
            _increment_attempts: bool,
            _now: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn slow_lookups_time_out_and_keep_the_original() {
        let fx = Fixture::new();
        overlapping_setup(&fx).await;

        let duplicates = DuplicateDetector::new(
            Arc::clone(&fx.leads) as Arc<dyn LeadRepository>,
            Arc::clone(&fx.clients) as Arc<dyn ClientRepository>,
        );
        let guard = OverlapGuard::new(
            Arc::clone(&fx.clients) as Arc<dyn ClientRepository>,
            Arc::clone(&fx.commandes) as Arc<dyn CommandeRepository>,
            Arc::new(SlowDeliveryRepository),
            Arc::clone(&fx.settings) as Arc<dyn SettingsRepository>,
            Arc::new(duplicates),
            Duration::from_millis(20),
        );

        let outcome = guard.check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        assert!(matches!(outcome, OverlapOutcome::KeepOriginal));
    }

    #[tokio::test]
    async fn internal_failure_degrades_to_keep_original() {
        let fx = Fixture::new();
        overlapping_setup(&fx).await;

        let guard = fx.guard_with_deliveries(Arc::new(FailingDeliveryRepository));
        let outcome = guard.check(&lead(), &order("C-1", "ZR-ACME", 1), Utc::now()).await;
        assert!(matches!(outcome, OverlapOutcome::KeepOriginal));
    }
}
