//! Lead intake endpoint. Accepts a submission, runs it through the
//! routing pipeline and reports where it landed.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use leadflow_core::domain::lead::{Lead, NewLead};
use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_routing::{RoutingEngine, RoutingResult};

#[derive(Clone)]
pub struct IngestState {
    engine: Arc<RoutingEngine>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub lead_id: String,
    pub status: &'static str,
    /// Absent when the lead never reached routing (double submit).
    pub routing: Option<RoutingResult>,
    pub delivery_id: Option<String>,
    pub backfill_delivery_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(engine: Arc<RoutingEngine>) -> Router {
    Router::new().route("/leads", post(submit_lead)).with_state(IngestState { engine })
}

pub async fn submit_lead(
    State(state): State<IngestState>,
    Json(input): Json<NewLead>,
) -> Result<(StatusCode, Json<IngestResponse>), (StatusCode, Json<ErrorResponse>)> {
    let now = Utc::now();
    let lead = Lead::create(input, now).map_err(|error| {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error: error.to_string() }))
    })?;

    let outcome = state.engine.process_lead(lead, now).await.map_err(map_error)?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            lead_id: outcome.lead.id.0.clone(),
            status: outcome.lead.status.as_str(),
            routing: outcome.routing,
            delivery_id: outcome.delivery.map(|delivery| delivery.id.0),
            backfill_delivery_id: outcome.backfill_delivery.map(|delivery| delivery.id.0),
        }),
    ))
}

fn map_error(error: ApplicationError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        ApplicationError::Domain(DomainError::InvariantViolation(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ApplicationError::Domain(_) => StatusCode::CONFLICT,
        ApplicationError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(event_name = "ingest.failed", error = %error, "lead intake failed");
    }
    (status, Json(ErrorResponse { error: error.to_string() }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use chrono::Utc;
    use rust_decimal::Decimal;

    use leadflow_core::domain::client::{Client, ClientId};
    use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::lead::NewLead;
    use leadflow_db::repositories::{
        ClientRepository, CommandeRepository, InMemoryClientRepository,
        InMemoryCommandeRepository, InMemoryDeliveryRepository, InMemoryLeadRepository,
        InMemorySettingsRepository,
    };
    use leadflow_routing::{RoutingEngine, RoutingEngineConfig};

    use super::{submit_lead, IngestState};

    struct Fixture {
        clients: Arc<InMemoryClientRepository>,
        commandes: Arc<InMemoryCommandeRepository>,
        state: IngestState,
    }

    fn fixture() -> Fixture {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let clients = Arc::new(InMemoryClientRepository::default());
        let commandes = Arc::new(InMemoryCommandeRepository::default());
        let deliveries = Arc::new(InMemoryDeliveryRepository::default());
        let settings = Arc::new(InMemorySettingsRepository::default());
        let engine = Arc::new(RoutingEngine::new(
            leads,
            Arc::clone(&clients) as _,
            Arc::clone(&commandes) as _,
            deliveries,
            settings,
            RoutingEngineConfig::default(),
        ));
        Fixture { clients, commandes, state: IngestState { engine } }
    }

    fn client(id: &str) -> Client {
        Client {
            id: ClientId(id.to_string()),
            entity: Entity::Zr7,
            name: format!("Client {id}"),
            emails: vec!["ops@client.fr".to_string()],
            active: true,
            auto_send_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(id: &str, client_id: &str) -> Commande {
        Commande {
            id: CommandeId(id.to_string()),
            entity: Entity::Zr7,
            client_id: client_id.to_string(),
            product: "PV".to_string(),
            departments: DepartmentScope::All,
            weekly_quota: 10,
            price: Decimal::new(3500, 2),
            backlog_pct: 0.0,
            priority: 1,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn submission(phone: &str) -> NewLead {
        NewLead {
            entity: Entity::Zr7,
            phone: phone.to_string(),
            product: "PV".to_string(),
            department: Some("75".to_string()),
            session_id: Some(format!("sess-{phone}")),
        }
    }

    #[tokio::test]
    async fn submission_routes_to_an_open_order() {
        let fx = fixture();
        fx.clients.save(client("CL-1")).await.expect("save client");
        fx.commandes.save(order("C-1", "CL-1")).await.expect("save order");

        let (status, Json(payload)) =
            submit_lead(State(fx.state), Json(submission("0612345678")))
                .await
                .expect("submission should succeed");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payload.status, "routed");
        assert!(payload.delivery_id.is_some());
        let routing = payload.routing.expect("routing result");
        assert!(routing.success);
        assert_eq!(routing.client_id.as_deref(), Some("CL-1"));
    }

    #[tokio::test]
    async fn submission_without_open_orders_lands_in_the_backlog() {
        let fx = fixture();

        let (status, Json(payload)) =
            submit_lead(State(fx.state), Json(submission("0612345678")))
                .await
                .expect("submission should succeed");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payload.status, "no_open_orders");
        assert!(payload.delivery_id.is_none());
        let routing = payload.routing.expect("routing result");
        assert!(!routing.success);
        assert!(routing.is_backlog);
    }

    #[tokio::test]
    async fn submission_without_a_phone_is_rejected() {
        let fx = fixture();

        let result = submit_lead(
            State(fx.state),
            Json(NewLead { phone: "  ".to_string(), ..submission("0612345678") }),
        )
        .await;

        let (status, Json(payload)) = result.err().expect("rejection");
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(payload.error.contains("phone"));
    }
}
