//! Routing engine: the full intake pipeline.
//!
//! `route_lead` answers "which order should take this lead"; `process_lead`
//! runs the whole pipeline — double-submit check, order selection, overlap
//! guard, suspicious-lead replacement, backfill supplement and delivery
//! creation — and persists the resulting lead and delivery rows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use leadflow_core::backfill;
use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::delivery::Delivery;
use leadflow_core::domain::lead::{Lead, LeadQuality, LeadStatus};
use leadflow_core::errors::ApplicationError;
use leadflow_core::week::iso_week_start;
use leadflow_db::repositories::{
    ClientRepository, CommandeRepository, DeliveryRepository, LeadRepository, SettingsRepository,
};

use crate::duplicate::DuplicateDetector;
use crate::eligibility::{EligibleOrder, EligibleOrderFinder, EligibleOrderQuery};
use crate::overlap::{OverlapGuard, OverlapOutcome};
use crate::persistence;
use crate::reservation::BacklogReservationService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSkipReason {
    NoEligibleCommande,
    AllCommandesDuplicate,
}

impl RoutingSkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEligibleCommande => "no_eligible_commande",
            Self::AllCommandesDuplicate => "all_commandes_duplicate",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RoutingResult {
    pub success: bool,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub commande_id: Option<String>,
    pub is_backlog: bool,
    pub reason: Option<RoutingSkipReason>,
}

impl RoutingResult {
    fn skipped(reason: RoutingSkipReason, is_backlog: bool) -> Self {
        Self {
            success: false,
            client_id: None,
            client_name: None,
            commande_id: None,
            is_backlog,
            reason: Some(reason),
        }
    }
}

/// What `process_lead` did, with every row it wrote.
#[derive(Clone, Debug)]
pub struct ProcessOutcome {
    pub lead: Lead,
    /// None when the lead never reached routing (double submit).
    pub routing: Option<RoutingResult>,
    pub delivery: Option<Delivery>,
    /// Extra backlog unit injected to keep the order's ratio on target.
    pub backfill_delivery: Option<Delivery>,
}

#[derive(Clone, Debug)]
pub struct RoutingEngineConfig {
    /// Candidate window for backlog reservations.
    pub candidate_window: u32,
    pub overlap_timeout: Duration,
}

impl Default for RoutingEngineConfig {
    fn default() -> Self {
        Self { candidate_window: 50, overlap_timeout: Duration::from_millis(500) }
    }
}

enum Selection {
    Order(Box<(EligibleOrder, Client)>),
    Skip(RoutingSkipReason),
}

pub struct RoutingEngine {
    leads: Arc<dyn LeadRepository>,
    clients: Arc<dyn ClientRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    duplicates: Arc<DuplicateDetector>,
    finder: EligibleOrderFinder,
    reservation: BacklogReservationService,
    guard: OverlapGuard,
}

impl RoutingEngine {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        clients: Arc<dyn ClientRepository>,
        commandes: Arc<dyn CommandeRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        settings: Arc<dyn SettingsRepository>,
        config: RoutingEngineConfig,
    ) -> Self {
        let duplicates =
            Arc::new(DuplicateDetector::new(Arc::clone(&leads), Arc::clone(&clients)));
        let finder = EligibleOrderFinder::new(
            Arc::clone(&commandes),
            Arc::clone(&clients),
            Arc::clone(&leads),
        );
        let reservation = BacklogReservationService::new(
            Arc::clone(&leads),
            Arc::clone(&duplicates),
            config.candidate_window,
        );
        let guard = OverlapGuard::new(
            Arc::clone(&clients),
            commandes,
            Arc::clone(&deliveries),
            settings,
            Arc::clone(&duplicates),
            config.overlap_timeout,
        );
        Self { leads, clients, deliveries, duplicates, finder, reservation, guard }
    }

    /// Pick the order for a lead without writing anything.
    pub async fn route_lead(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<RoutingResult, ApplicationError> {
        match self.select(lead, now).await? {
            Selection::Order(boxed) => {
                let (order, client) = *boxed;
                Ok(RoutingResult {
                    success: true,
                    client_id: Some(client.id.0),
                    client_name: Some(client.name),
                    commande_id: Some(order.commande.id.0),
                    is_backlog: lead.is_backlog,
                    reason: None,
                })
            }
            Selection::Skip(reason) => Ok(RoutingResult::skipped(reason, lead.is_backlog)),
        }
    }

    /// Route many leads. Quota state is re-read per lead; an early lead in
    /// the batch can exhaust an order for a later one.
    pub async fn route_batch(
        &self,
        leads: &[Lead],
        now: DateTime<Utc>,
    ) -> Result<Vec<(Lead, RoutingResult)>, ApplicationError> {
        let mut results = Vec::with_capacity(leads.len());
        for lead in leads {
            let result = self.route_lead(lead, now).await?;
            results.push((lead.clone(), result));
        }
        Ok(results)
    }

    /// Full intake pipeline. Persists the lead in its final status and any
    /// deliveries created along the way.
    pub async fn process_lead(
        &self,
        mut lead: Lead,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ApplicationError> {
        if self.duplicates.is_double_submit(&lead, now).await? {
            lead.status = LeadStatus::Duplicate;
            lead.updated_at = now;
            self.leads.save(lead.clone()).await.map_err(persistence)?;
            info!(
                event_name = "routing.double_submit",
                lead_id = %lead.id.0,
                "duplicate form submission suppressed"
            );
            return Ok(ProcessOutcome {
                lead,
                routing: None,
                delivery: None,
                backfill_delivery: None,
            });
        }

        let (mut order, mut client) = match self.select(&lead, now).await? {
            Selection::Order(boxed) => *boxed,
            Selection::Skip(reason) => {
                match reason {
                    RoutingSkipReason::NoEligibleCommande => {
                        lead.status = LeadStatus::NoOpenOrders;
                        // Unrouted leads age into the backlog pool.
                        if !lead.is_backlog {
                            lead.is_backlog = true;
                            lead.backlog_since = Some(now);
                        }
                    }
                    RoutingSkipReason::AllCommandesDuplicate => {
                        lead.status = LeadStatus::Duplicate;
                    }
                }
                lead.updated_at = now;
                self.leads.save(lead.clone()).await.map_err(persistence)?;
                info!(
                    event_name = "routing.skipped",
                    lead_id = %lead.id.0,
                    reason = reason.as_str(),
                );
                let routing = RoutingResult::skipped(reason, lead.is_backlog);
                return Ok(ProcessOutcome {
                    lead,
                    routing: Some(routing),
                    delivery: None,
                    backfill_delivery: None,
                });
            }
        };

        if let OverlapOutcome::Redirect { commande, client: redirected } =
            self.guard.check(&lead, &order.commande, now).await
        {
            info!(
                event_name = "routing.overlap_redirect",
                lead_id = %lead.id.0,
                from_client = %client.id.0,
                to_client = %redirected.id.0,
            );
            let counts = self
                .leads
                .weekly_counts(&commande.id, iso_week_start(now))
                .await
                .map_err(persistence)?;
            order = EligibleOrder {
                quota_remaining: commande.quota_remaining(counts.delivered),
                delivered_this_week: counts.delivered,
                backlog_delivered_this_week: counts.backlog,
                commande,
            };
            client = redirected;
        }

        // Suspicious leads are replaced, never silently dropped: the
        // reserved backlog lead becomes the delivered unit and the trigger
        // is held with an audit trail. With no replacement available the
        // suspicious lead ships as-is.
        let (unit, held) = if lead.quality == LeadQuality::Suspicious {
            match self.reservation.reserve_replacement(&lead, &order.commande, now).await? {
                Some(mut replacement) => {
                    replacement.replacement_source = Some("suspicious_replacement".to_string());
                    lead.was_replaced = true;
                    lead.replacement_lead_id = Some(replacement.id.clone());
                    lead.status = LeadStatus::HoldSource;
                    lead.updated_at = now;
                    self.leads.save(lead.clone()).await.map_err(persistence)?;
                    info!(
                        event_name = "routing.suspicious_replaced",
                        lead_id = %lead.id.0,
                        replacement_lead_id = %replacement.id.0,
                    );
                    (replacement, true)
                }
                None => (lead.clone(), false),
            }
        } else {
            (lead.clone(), false)
        };

        let delivery = self.create_unit_delivery(unit.clone(), &order, &client, now).await?;
        let routed_unit = self
            .load_lead(&unit.id)
            .await?;

        // Keep the order's backlog share on target: when the calculator
        // says the next unit should be backlog and quota allows a second
        // unit, inject one reserved backlog lead alongside.
        let mut backfill_delivery = None;
        let unit_was_backlog = routed_unit.is_backlog;
        let wants_backlog = !unit_was_backlog
            && backfill::next_unit_is_backlog(
                order.commande.backlog_pct,
                order.delivered_this_week + 1,
                order.backlog_delivered_this_week,
            );
        let quota_allows = order.quota_remaining.is_none_or(|remaining| remaining >= 2);
        if wants_backlog && quota_allows {
            if let Some(mut supplement) =
                self.reservation.reserve_replacement(&lead, &order.commande, now).await?
            {
                supplement.replacement_source = Some("backfill".to_string());
                let supplement_delivery =
                    self.create_unit_delivery(supplement, &order, &client, now).await?;
                backfill_delivery = Some(supplement_delivery);
            }
        }

        let final_lead = if held { lead } else { routed_unit };
        Ok(ProcessOutcome {
            lead: final_lead,
            routing: Some(RoutingResult {
                success: true,
                client_id: Some(client.id.0.clone()),
                client_name: Some(client.name.clone()),
                commande_id: Some(order.commande.id.0.clone()),
                is_backlog: unit_was_backlog,
                reason: None,
            }),
            delivery: Some(delivery),
            backfill_delivery,
        })
    }

    async fn select(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<Selection, ApplicationError> {
        let query = EligibleOrderQuery {
            entity: lead.entity,
            product: lead.product.clone(),
            department: lead.department.clone(),
            is_backlog: lead.is_backlog,
        };
        let candidates = self.finder.find(&query, now).await?;
        if candidates.is_empty() {
            return Ok(Selection::Skip(RoutingSkipReason::NoEligibleCommande));
        }

        // Clients that already took this phone+product in the last 30
        // days are skipped up front.
        let served: HashSet<String> = self
            .duplicates
            .check_duplicate_for_any_client(lead.entity, &lead.phone, &lead.product, now)
            .await?
            .into_iter()
            .map(|hit| hit.client_id)
            .collect();

        for candidate in candidates {
            if served.contains(&candidate.commande.client_id) {
                continue;
            }
            let duplicate = self
                .duplicates
                .check_duplicate_for_client(
                    lead.entity,
                    &lead.phone,
                    &lead.product,
                    &candidate.commande.client_id,
                    now,
                )
                .await?;
            if duplicate.is_some() {
                continue;
            }

            let Some(client) = self
                .clients
                .find_by_id(&ClientId(candidate.commande.client_id.clone()))
                .await
                .map_err(persistence)?
            else {
                return Err(ApplicationError::not_found(
                    "client",
                    candidate.commande.client_id.clone(),
                ));
            };
            return Ok(Selection::Order(Box::new((candidate, client))));
        }

        Ok(Selection::Skip(RoutingSkipReason::AllCommandesDuplicate))
    }

    async fn create_unit_delivery(
        &self,
        mut unit: Lead,
        order: &EligibleOrder,
        client: &Client,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ApplicationError> {
        let delivery = Delivery::create(
            unit.entity,
            client.id.0.clone(),
            order.commande.id.0.clone(),
            vec![unit.id.clone()],
            order.commande.product.clone(),
            now,
        )?;
        // Delivery row first, then the lead linkage that references it.
        self.deliveries.save(delivery.clone()).await.map_err(persistence)?;

        unit.status = LeadStatus::Routed;
        unit.routed_at = Some(now);
        unit.delivery_id = Some(delivery.id.0.clone());
        unit.delivery_commande_id = Some(order.commande.id.0.clone());
        unit.updated_at = now;
        self.leads.save(unit.clone()).await.map_err(persistence)?;

        info!(
            event_name = "routing.lead_routed",
            lead_id = %unit.id.0,
            delivery_id = %delivery.id.0,
            client_id = %client.id.0,
            commande_id = %order.commande.id.0,
            is_backlog = unit.is_backlog,
        );
        Ok(delivery)
    }

    async fn load_lead(
        &self,
        id: &leadflow_core::domain::lead::LeadId,
    ) -> Result<Lead, ApplicationError> {
        self.leads
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("lead", id.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use leadflow_core::domain::client::{Client, ClientId};
    use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
    use leadflow_core::domain::delivery::DeliveryStatus;
    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::lead::{Lead, LeadQuality, LeadStatus, NewLead};
    use leadflow_core::errors::{ApplicationError, DomainError};
    use leadflow_db::repositories::{
        ClientRepository, CommandeRepository, DeliveryRepository, InMemoryClientRepository,
        InMemoryCommandeRepository, InMemoryDeliveryRepository, InMemoryLeadRepository,
        InMemorySettingsRepository, LeadRepository, SettingsRepository,
    };

    use super::{RoutingEngine, RoutingEngineConfig, RoutingSkipReason};
    use crate::state_machine::DeliveryStateMachine;

    struct Fixture {
        leads: Arc<InMemoryLeadRepository>,
        clients: Arc<InMemoryClientRepository>,
        commandes: Arc<InMemoryCommandeRepository>,
        deliveries: Arc<InMemoryDeliveryRepository>,
        engine: RoutingEngine,
    }

    fn fixture() -> Fixture {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let clients = Arc::new(InMemoryClientRepository::default());
        let commandes = Arc::new(InMemoryCommandeRepository::default());
        let deliveries = Arc::new(InMemoryDeliveryRepository::default());
        let settings = Arc::new(InMemorySettingsRepository::default());

        let engine = RoutingEngine::new(
            Arc::clone(&leads) as Arc<dyn LeadRepository>,
            Arc::clone(&clients) as Arc<dyn ClientRepository>,
            Arc::clone(&commandes) as Arc<dyn CommandeRepository>,
            Arc::clone(&deliveries) as Arc<dyn DeliveryRepository>,
            settings as Arc<dyn SettingsRepository>,
            RoutingEngineConfig::default(),
        );
        Fixture { leads, clients, commandes, deliveries, engine }
    }

    fn client(id: &str, emails: &[&str]) -> Client {
        Client {
            id: ClientId(id.to_string()),
            entity: Entity::Zr7,
            name: format!("Client {id}"),
            emails: emails.iter().map(|email| email.to_string()).collect(),
            active: true,
            auto_send_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(id: &str, client_id: &str, priority: i32, quota: u32) -> Commande {
        Commande {
            id: CommandeId(id.to_string()),
            entity: Entity::Zr7,
            client_id: client_id.to_string(),
            product: "PV".to_string(),
            departments: DepartmentScope::All,
            weekly_quota: quota,
            price: Decimal::new(3500, 2),
            backlog_pct: 0.0,
            priority,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn lead(phone: &str) -> Lead {
        Lead::create(
            NewLead {
                entity: Entity::Zr7,
                phone: phone.to_string(),
                product: "PV".to_string(),
                department: Some("75".to_string()),
                session_id: Some(format!("sess-{phone}")),
            },
            Utc::now(),
        )
        .expect("valid lead")
    }

    async fn one_client_one_order(fx: &Fixture, quota: u32) {
        fx.clients.save(client("CL-1", &["ops@cl1.fr"])).await.expect("save");
        fx.commandes.save(order("C-1", "CL-1", 1, quota)).await.expect("save");
    }

    #[tokio::test]
    async fn routes_to_the_highest_priority_order() {
        let fx = fixture();
        fx.clients.save(client("CL-1", &["ops@cl1.fr"])).await.expect("save");
        fx.clients.save(client("CL-2", &["ops@cl2.fr"])).await.expect("save");
        fx.commandes.save(order("C-1", "CL-1", 2, 10)).await.expect("save");
        fx.commandes.save(order("C-2", "CL-2", 1, 10)).await.expect("save");

        let result = fx.engine.route_lead(&lead("0611111111"), Utc::now()).await.expect("route");
        assert!(result.success);
        assert_eq!(result.commande_id.as_deref(), Some("C-2"));
        assert_eq!(result.client_name.as_deref(), Some("Client CL-2"));
    }

    #[tokio::test]
    async fn duplicate_client_falls_through_to_the_next_order() {
        let fx = fixture();
        fx.clients.save(client("CL-1", &["ops@cl1.fr"])).await.expect("save");
        fx.clients.save(client("CL-2", &["ops@cl2.fr"])).await.expect("save");
        fx.commandes.save(order("C-1", "CL-1", 1, 10)).await.expect("save");
        fx.commandes.save(order("C-2", "CL-2", 2, 10)).await.expect("save");

        // CL-1 already took this phone+product ten days ago.
        let mut prior = lead("0611111111");
        prior.session_id = None;
        prior.created_at = Utc::now() - Duration::days(10);
        prior.status = LeadStatus::Livre;
        prior.delivered_to_client_id = Some("CL-1".to_string());
        prior.delivered_at = Some(Utc::now() - Duration::days(10));
        fx.leads.save(prior).await.expect("save");

        let result = fx.engine.route_lead(&lead("0611111111"), Utc::now()).await.expect("route");
        assert!(result.success);
        assert_eq!(result.commande_id.as_deref(), Some("C-2"));
    }

    #[tokio::test]
    async fn all_clients_served_yields_all_commandes_duplicate() {
        let fx = fixture();
        one_client_one_order(&fx, 10).await;

        let mut prior = lead("0611111111");
        prior.session_id = None;
        prior.created_at = Utc::now() - Duration::days(10);
        prior.status = LeadStatus::Livre;
        prior.delivered_to_client_id = Some("CL-1".to_string());
        prior.delivered_at = Some(Utc::now() - Duration::days(10));
        fx.leads.save(prior).await.expect("save");

        let outcome =
            fx.engine.process_lead(lead("0611111111"), Utc::now()).await.expect("process");
        assert_eq!(outcome.lead.status, LeadStatus::Duplicate);
        let routing = outcome.routing.expect("routing ran");
        assert_eq!(routing.reason, Some(RoutingSkipReason::AllCommandesDuplicate));
        assert!(outcome.delivery.is_none());
    }

    #[tokio::test]
    async fn no_orders_parks_the_lead_in_the_backlog_pool() {
        let fx = fixture();

        let outcome =
            fx.engine.process_lead(lead("0611111111"), Utc::now()).await.expect("process");
        assert_eq!(outcome.lead.status, LeadStatus::NoOpenOrders);
        assert!(outcome.lead.is_backlog);
        assert!(outcome.lead.backlog_since.is_some());
        assert_eq!(
            outcome.routing.expect("routing ran").reason,
            Some(RoutingSkipReason::NoEligibleCommande)
        );
    }

    #[tokio::test]
    async fn double_submit_is_suppressed_before_routing() {
        let fx = fixture();
        one_client_one_order(&fx, 10).await;

        let first = lead("0611111111");
        fx.leads.save(first.clone()).await.expect("save");

        let mut resubmit = lead("0611111111");
        resubmit.session_id = first.session_id.clone();

        let outcome = fx
            .engine
            .process_lead(resubmit, first.created_at + Duration::seconds(4))
            .await
            .expect("process");
        assert_eq!(outcome.lead.status, LeadStatus::Duplicate);
        assert!(outcome.routing.is_none(), "routing never ran");
        assert!(outcome.delivery.is_none());
    }

    #[tokio::test]
    async fn successful_processing_links_lead_and_delivery() {
        let fx = fixture();
        one_client_one_order(&fx, 10).await;

        let outcome =
            fx.engine.process_lead(lead("0611111111"), Utc::now()).await.expect("process");

        assert_eq!(outcome.lead.status, LeadStatus::Routed);
        assert!(outcome.lead.routed_at.is_some());
        let delivery = outcome.delivery.expect("delivery created");
        assert_eq!(delivery.status, DeliveryStatus::PendingCsv);
        assert_eq!(outcome.lead.delivery_id.as_deref(), Some(delivery.id.0.as_str()));
        assert_eq!(outcome.lead.delivery_commande_id.as_deref(), Some("C-1"));

        let stored =
            fx.deliveries.find_by_id(&delivery.id).await.expect("find").expect("persisted");
        assert_eq!(stored.lead_ids, vec![outcome.lead.id]);
    }

    #[tokio::test]
    async fn suspicious_lead_is_replaced_from_the_backlog() {
        let fx = fixture();
        one_client_one_order(&fx, 10).await;

        let mut candidate = lead("0622222222");
        candidate.session_id = None;
        candidate.is_backlog = true;
        candidate.backlog_since = Some(Utc::now() - Duration::days(14));
        candidate.status = LeadStatus::NoOpenOrders;
        candidate.created_at = Utc::now() - Duration::days(14);
        fx.leads.save(candidate.clone()).await.expect("save");

        let mut suspicious = lead("0611111111");
        suspicious.quality = LeadQuality::Suspicious;

        let outcome = fx.engine.process_lead(suspicious, Utc::now()).await.expect("process");

        assert_eq!(outcome.lead.status, LeadStatus::HoldSource);
        assert!(outcome.lead.was_replaced);
        assert_eq!(outcome.lead.replacement_lead_id.as_ref(), Some(&candidate.id));

        let delivery = outcome.delivery.expect("delivery created");
        assert_eq!(delivery.lead_ids, vec![candidate.id.clone()]);

        let replacement =
            fx.leads.find_by_id(&candidate.id).await.expect("find").expect("exists");
        assert_eq!(replacement.status, LeadStatus::Routed);
        assert_eq!(replacement.replacement_source.as_deref(), Some("suspicious_replacement"));
    }

    #[tokio::test]
    async fn suspicious_lead_ships_itself_when_the_pool_is_empty() {
        let fx = fixture();
        one_client_one_order(&fx, 10).await;

        let mut suspicious = lead("0611111111");
        suspicious.quality = LeadQuality::Suspicious;
        let id = suspicious.id.clone();

        let outcome = fx.engine.process_lead(suspicious, Utc::now()).await.expect("process");
        assert_eq!(outcome.lead.status, LeadStatus::Routed);
        assert!(!outcome.lead.was_replaced);
        assert_eq!(outcome.delivery.expect("delivery created").lead_ids, vec![id]);
    }

    #[tokio::test]
    async fn backfill_supplement_is_injected_when_ratio_is_behind() {
        let fx = fixture();
        fx.clients.save(client("CL-1", &["ops@cl1.fr"])).await.expect("save");
        let mut backfilled = order("C-1", "CL-1", 1, 0);
        backfilled.backlog_pct = 0.5;
        fx.commandes.save(backfilled).await.expect("save");

        let mut candidate = lead("0622222222");
        candidate.session_id = None;
        candidate.is_backlog = true;
        candidate.backlog_since = Some(Utc::now() - Duration::days(20));
        candidate.status = LeadStatus::New;
        candidate.created_at = Utc::now() - Duration::days(20);
        fx.leads.save(candidate.clone()).await.expect("save");

        let outcome =
            fx.engine.process_lead(lead("0611111111"), Utc::now()).await.expect("process");

        assert_eq!(outcome.lead.status, LeadStatus::Routed);
        let supplement = outcome.backfill_delivery.expect("backlog unit injected");
        assert_eq!(supplement.lead_ids, vec![candidate.id.clone()]);

        let routed =
            fx.leads.find_by_id(&candidate.id).await.expect("find").expect("exists");
        assert_eq!(routed.status, LeadStatus::Routed);
        assert_eq!(routed.replacement_source.as_deref(), Some("backfill"));
        assert!(routed.is_backlog, "supplement still counts as a backlog unit");
    }

    /// Two-unit weekly quota, three leads: two route, the third finds no
    /// open order; the first delivery runs to `sent`, its lead is `livre`,
    /// and the sent delivery refuses further transitions.
    #[tokio::test]
    async fn quota_exhaustion_end_to_end() {
        let fx = fixture();
        one_client_one_order(&fx, 2).await;
        let now = Utc::now();

        let first = fx.engine.process_lead(lead("0611111111"), now).await.expect("process");
        let second = fx.engine.process_lead(lead("0622222222"), now).await.expect("process");
        assert_eq!(first.lead.status, LeadStatus::Routed);
        assert_eq!(second.lead.status, LeadStatus::Routed);

        let third = fx.engine.process_lead(lead("0633333333"), now).await.expect("process");
        assert_eq!(third.lead.status, LeadStatus::NoOpenOrders);
        assert_eq!(
            third.routing.expect("routing ran").reason,
            Some(RoutingSkipReason::NoEligibleCommande)
        );

        let machine = DeliveryStateMachine::new(
            Arc::clone(&fx.deliveries) as Arc<dyn DeliveryRepository>,
            Arc::clone(&fx.leads) as Arc<dyn LeadRepository>,
        );
        let delivery_id = first.delivery.expect("delivery created").id;
        machine.mark_ready_to_send(&delivery_id, "csv", "leads.csv", now).await.expect("ready");
        machine.mark_sending(&delivery_id, now).await.expect("sending");
        machine
            .mark_sent(&delivery_id, vec!["ops@cl1.fr".to_string()], None, now)
            .await
            .expect("sent");

        let delivered =
            fx.leads.find_by_id(&first.lead.id).await.expect("find").expect("exists");
        assert_eq!(delivered.status, LeadStatus::Livre);
        assert_eq!(delivered.delivered_to_client_id.as_deref(), Some("CL-1"));

        let terminal = machine.mark_failed(&delivery_id, "too late", true, now).await;
        assert!(matches!(
            terminal,
            Err(ApplicationError::Domain(DomainError::TerminalDelivery { .. }))
        ));
    }
}
