use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::commande::{Commande, CommandeId};
use leadflow_core::domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::{Lead, LeadId};
use leadflow_core::domain::transfer::IntercompanyTransfer;

pub(crate) mod codec;

pub mod clients;
pub mod commandes;
pub mod deliveries;
pub mod leads;
pub mod memory;
pub mod settings;
pub mod transfers;

pub use clients::SqlClientRepository;
pub use commandes::SqlCommandeRepository;
pub use deliveries::SqlDeliveryRepository;
pub use leads::SqlLeadRepository;
pub use memory::{
    InMemoryClientRepository, InMemoryCommandeRepository, InMemoryDeliveryRepository,
    InMemoryLeadRepository, InMemorySettingsRepository, InMemoryTransferRepository,
};
pub use settings::SqlSettingsRepository;
pub use transfers::SqlTransferRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Audit payload for a 30-day duplicate hit: who already received this
/// phone+product, and when.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredLeadRecord {
    pub lead_id: LeadId,
    pub client_id: String,
    pub delivered_at: DateTime<Utc>,
}

/// Per-order delivery counts for the current ISO week, re-aggregated from
/// lead rows on every call rather than maintained as counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeeklyCounts {
    pub delivered: u32,
    pub backlog: u32,
}

/// Candidate filter for backlog replacement lookups.
#[derive(Clone, Debug)]
pub struct BacklogCandidateQuery {
    pub entity: Entity,
    pub product: String,
    pub exclude_lead_id: LeadId,
    pub limit: u32,
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;

    /// Insert-or-replace by id.
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;

    /// True when another lead with the same session and phone was created
    /// at or after `submitted_after`.
    async fn exists_double_submit(
        &self,
        session_id: &str,
        phone: &str,
        exclude: &LeadId,
        submitted_after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Leads of this entity delivered (`livre`) for the same phone+product
    /// on or after `since`, newest first.
    async fn find_delivered_since(
        &self,
        entity: Entity,
        phone: &str,
        product: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveredLeadRecord>, RepositoryError>;

    /// Backlog leads in an available status, phone and department present,
    /// oldest created first, capped at `limit`.
    async fn find_backlog_candidates(
        &self,
        query: &BacklogCandidateQuery,
    ) -> Result<Vec<Lead>, RepositoryError>;

    /// Atomic reserve: moves the lead to `reserved_for_replacement` only
    /// if it is still in a backlog-available status at write time. Returns
    /// false when another caller won the race.
    async fn try_reserve_for_replacement(
        &self,
        id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Units consumed against an order since `week_start`: leads routed or
    /// delivered under it, split by backlog flag.
    async fn weekly_counts(
        &self,
        commande_id: &CommandeId,
        week_start: DateTime<Utc>,
    ) -> Result<WeeklyCounts, RepositoryError>;
}

#[async_trait]
pub trait CommandeRepository: Send + Sync {
    async fn find_by_id(&self, id: &CommandeId) -> Result<Option<Commande>, RepositoryError>;
    async fn save(&self, commande: Commande) -> Result<(), RepositoryError>;

    /// Active orders for an entity+product, priority then id ascending.
    async fn find_active(
        &self,
        entity: Entity,
        product: &str,
    ) -> Result<Vec<Commande>, RepositoryError>;
}

/// Field payload for the one transition that may set `sent`.
#[derive(Clone, Debug)]
pub struct SentFields {
    pub sent_to: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub send_attempts: u32,
    pub sent_by: Option<String>,
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn find_by_id(&self, id: &DeliveryId) -> Result<Option<Delivery>, RepositoryError>;
    async fn save(&self, delivery: Delivery) -> Result<(), RepositoryError>;
    async fn list_by_status(
        &self,
        entity: Entity,
        status: DeliveryStatus,
    ) -> Result<Vec<Delivery>, RepositoryError>;

    /// True when any of `client_ids` received a sent delivery on or after
    /// `since`. Used by the overlap guard's activity check.
    async fn any_sent_to_clients_since(
        &self,
        client_ids: &[ClientId],
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Conditional transition to `ready_to_send`, storing the rendered
    /// CSV. Returns false when the row is no longer in `from`.
    async fn set_ready_to_send(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        csv_content: &str,
        csv_filename: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn set_sending(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn set_sent(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        fields: &SentFields,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn set_failed(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        error: &str,
        increment_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError>;
    async fn save(&self, client: Client) -> Result<(), RepositoryError>;
    async fn list_active_by_entity(&self, entity: Entity) -> Result<Vec<Client>, RepositoryError>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Idempotent creation keyed on delivery id; returns false when a
    /// transfer for that delivery already exists.
    async fn insert_if_absent(
        &self,
        transfer: IntercompanyTransfer,
    ) -> Result<bool, RepositoryError>;

    async fn find_by_delivery_id(
        &self,
        delivery_id: &str,
    ) -> Result<Option<IntercompanyTransfer>, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    async fn set(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError>;
}
