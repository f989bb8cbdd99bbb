//! Eligible-order selection.
//!
//! Quota state is re-aggregated from lead rows on every call. There is no
//! maintained counter to drift, so a crashed or retried routing pass never
//! double-counts a unit.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use leadflow_core::backfill;
use leadflow_core::domain::commande::Commande;
use leadflow_core::domain::entity::Entity;
use leadflow_core::errors::ApplicationError;
use leadflow_core::week::iso_week_start;
use leadflow_db::repositories::{ClientRepository, CommandeRepository, LeadRepository};

use crate::persistence;

#[derive(Clone, Debug)]
pub struct EligibleOrderQuery {
    pub entity: Entity,
    pub product: String,
    pub department: Option<String>,
    pub is_backlog: bool,
}

/// An order that can accept the next unit, annotated with its current
/// week's consumption so callers can reason about backfill.
#[derive(Clone, Debug)]
pub struct EligibleOrder {
    pub commande: Commande,
    /// None when the order's quota is unlimited.
    pub quota_remaining: Option<u32>,
    pub delivered_this_week: u32,
    pub backlog_delivered_this_week: u32,
}

pub struct EligibleOrderFinder {
    commandes: Arc<dyn CommandeRepository>,
    clients: Arc<dyn ClientRepository>,
    leads: Arc<dyn LeadRepository>,
}

impl EligibleOrderFinder {
    pub fn new(
        commandes: Arc<dyn CommandeRepository>,
        clients: Arc<dyn ClientRepository>,
        leads: Arc<dyn LeadRepository>,
    ) -> Self {
        Self { commandes, clients, leads }
    }

    /// Active orders of active clients matching the query, with weekly
    /// quota remaining, ordered by (priority asc, order id asc).
    pub async fn find(
        &self,
        query: &EligibleOrderQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleOrder>, ApplicationError> {
        let week_start = iso_week_start(now);
        let candidates = self
            .commandes
            .find_active(query.entity, &query.product)
            .await
            .map_err(persistence)?;

        let mut eligible = Vec::new();
        for commande in candidates {
            if !self.covers_department(&commande, query.department.as_deref()) {
                continue;
            }

            let client_active = self
                .clients
                .find_by_id(&leadflow_core::domain::client::ClientId(commande.client_id.clone()))
                .await
                .map_err(persistence)?
                .is_some_and(|client| client.active);
            if !client_active {
                continue;
            }

            let counts = self
                .leads
                .weekly_counts(&commande.id, week_start)
                .await
                .map_err(persistence)?;

            let quota_remaining = commande.quota_remaining(counts.delivered);
            if quota_remaining == Some(0) {
                continue;
            }

            if query.is_backlog && !self.accepts_backlog_unit(&commande, counts.delivered, counts.backlog) {
                continue;
            }

            eligible.push(EligibleOrder {
                commande,
                quota_remaining,
                delivered_this_week: counts.delivered,
                backlog_delivered_this_week: counts.backlog,
            });
        }

        // find_active already sorts by (priority, id); the filter above
        // preserves that order.
        Ok(eligible)
    }

    fn covers_department(&self, commande: &Commande, department: Option<&str>) -> bool {
        match department {
            Some(department) => commande.departments.covers(department),
            // A lead with no department can only go to wildcard orders.
            None => commande.departments.is_wildcard(),
        }
    }

    /// A backlog unit is accepted only while the order's backlog share for
    /// the week still sits below its configured target.
    fn accepts_backlog_unit(&self, commande: &Commande, delivered: u32, backlog: u32) -> bool {
        commande.accepts_backlog()
            && backfill::next_unit_is_backlog(commande.backlog_pct, delivered, backlog)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use leadflow_core::domain::client::{Client, ClientId};
    use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::lead::{Lead, LeadStatus, NewLead};
    use leadflow_db::repositories::{
        ClientRepository, CommandeRepository, InMemoryClientRepository,
        InMemoryCommandeRepository, InMemoryLeadRepository, LeadRepository,
    };

    use super::{EligibleOrderFinder, EligibleOrderQuery};

    struct Fixture {
        commandes: Arc<InMemoryCommandeRepository>,
        clients: Arc<InMemoryClientRepository>,
        leads: Arc<InMemoryLeadRepository>,
        finder: EligibleOrderFinder,
    }

    fn fixture() -> Fixture {
        let commandes = Arc::new(InMemoryCommandeRepository::default());
        let clients = Arc::new(InMemoryClientRepository::default());
        let leads = Arc::new(InMemoryLeadRepository::default());
        let finder = EligibleOrderFinder::new(
            Arc::clone(&commandes) as Arc<dyn CommandeRepository>,
            Arc::clone(&clients) as Arc<dyn ClientRepository>,
            Arc::clone(&leads) as Arc<dyn LeadRepository>,
        );
        Fixture { commandes, clients, leads, finder }
    }

    fn client(id: &str, active: bool) -> Client {
        Client {
            id: ClientId(id.to_string()),
            entity: Entity::Zr7,
            name: format!("Client {id}"),
            emails: vec![format!("{}@example.fr", id.to_lowercase())],
            active,
            auto_send_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn commande(id: &str, client_id: &str, priority: i32, quota: u32) -> Commande {
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

    async fn consume_unit(leads: &InMemoryLeadRepository, commande_id: &str, n: u32) {
        let now = Utc::now();
        for i in 0..n {
            let mut lead = Lead::create(
                NewLead {
                    entity: Entity::Zr7,
                    phone: format!("06000000{i:02}"),
                    product: "PV".to_string(),
                    department: Some("75".to_string()),
                    session_id: None,
                },
                now - Duration::minutes(5),
            )
            .expect("valid lead");
            lead.status = LeadStatus::Routed;
            lead.delivery_commande_id = Some(commande_id.to_string());
            lead.routed_at = Some(now - Duration::minutes(1));
            leads.save(lead).await.expect("save");
        }
    }

    fn query(department: Option<&str>) -> EligibleOrderQuery {
        EligibleOrderQuery {
            entity: Entity::Zr7,
            product: "PV".to_string(),
            department: department.map(String::from),
            is_backlog: false,
        }
    }

    #[tokio::test]
    async fn orders_come_back_in_priority_then_id_order() {
        let fx = fixture();
        fx.clients.save(client("CL-1", true)).await.expect("save");
        fx.commandes.save(commande("C-B", "CL-1", 2, 10)).await.expect("save");
        fx.commandes.save(commande("C-C", "CL-1", 1, 10)).await.expect("save");
        fx.commandes.save(commande("C-A", "CL-1", 2, 10)).await.expect("save");

        let eligible = fx.finder.find(&query(Some("75")), Utc::now()).await.expect("find");
        let ids: Vec<&str> = eligible.iter().map(|order| order.commande.id.0.as_str()).collect();
        assert_eq!(ids, vec!["C-C", "C-A", "C-B"]);
    }

    #[tokio::test]
    async fn exhausted_quota_excludes_the_order() {
        let fx = fixture();
        fx.clients.save(client("CL-1", true)).await.expect("save");
        fx.commandes.save(commande("C-1", "CL-1", 1, 2)).await.expect("save");
        consume_unit(&fx.leads, "C-1", 2).await;

        let eligible = fx.finder.find(&query(Some("75")), Utc::now()).await.expect("find");
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn zero_quota_is_unlimited() {
        let fx = fixture();
        fx.clients.save(client("CL-1", true)).await.expect("save");
        fx.commandes.save(commande("C-1", "CL-1", 1, 0)).await.expect("save");
        consume_unit(&fx.leads, "C-1", 40).await;

        let eligible = fx.finder.find(&query(Some("75")), Utc::now()).await.expect("find");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].quota_remaining, None);
        assert_eq!(eligible[0].delivered_this_week, 40);
    }

    #[tokio::test]
    async fn inactive_client_excludes_its_orders() {
        let fx = fixture();
        fx.clients.save(client("CL-1", false)).await.expect("save");
        fx.commandes.save(commande("C-1", "CL-1", 1, 10)).await.expect("save");

        let eligible = fx.finder.find(&query(Some("75")), Utc::now()).await.expect("find");
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn department_scoping_respects_lists_and_wildcards() {
        let fx = fixture();
        fx.clients.save(client("CL-1", true)).await.expect("save");
        let mut scoped = commande("C-1", "CL-1", 1, 10);
        scoped.departments = DepartmentScope::List(vec!["13".to_string()]);
        fx.commandes.save(scoped).await.expect("save");

        assert!(fx.finder.find(&query(Some("75")), Utc::now()).await.expect("find").is_empty());
        assert_eq!(fx.finder.find(&query(Some("13")), Utc::now()).await.expect("find").len(), 1);
        // No department recorded: list-scoped orders cannot take the lead.
        assert!(fx.finder.find(&query(None), Utc::now()).await.expect("find").is_empty());
    }

    #[tokio::test]
    async fn backlog_query_requires_room_under_the_target() {
        let fx = fixture();
        fx.clients.save(client("CL-1", true)).await.expect("save");

        let mut order = commande("C-1", "CL-1", 1, 0);
        order.backlog_pct = 0.2;
        fx.commandes.save(order).await.expect("save");

        let mut backlog_query = query(Some("75"));
        backlog_query.is_backlog = true;

        // Fresh week, nothing delivered: ceil(0.2 * 1) = 1 > 0, room exists.
        assert_eq!(fx.finder.find(&backlog_query, Utc::now()).await.expect("find").len(), 1);

        // An order with no backlog target never takes backlog units.
        let mut no_backlog = commande("C-2", "CL-1", 2, 0);
        no_backlog.backlog_pct = 0.0;
        fx.commandes.save(no_backlog).await.expect("save");
        let eligible = fx.finder.find(&backlog_query, Utc::now()).await.expect("find");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].commande.id.0, "C-1");
    }
}
