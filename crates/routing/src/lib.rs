//! Routing services: duplicate suppression, eligible-order selection,
//! backlog reservation, the cross-entity overlap guard, the routing
//! engine and the delivery state machine.
//!
//! Every service here works through the repository traits in
//! `leadflow-db`, so the same logic runs against SQLite in production and
//! the in-memory repositories in tests.

pub mod duplicate;
pub mod eligibility;
pub mod engine;
pub mod overlap;
pub mod reservation;
pub mod state_machine;
pub mod transfer;

pub use duplicate::{DuplicateDetector, DuplicateHit};
pub use eligibility::{EligibleOrder, EligibleOrderFinder, EligibleOrderQuery};
pub use engine::{
    ProcessOutcome, RoutingEngine, RoutingEngineConfig, RoutingResult, RoutingSkipReason,
};
pub use overlap::{OverlapGuard, OverlapOutcome};
pub use reservation::BacklogReservationService;
pub use state_machine::{CsvReadyItem, DeliveryStateMachine, SentItem};
pub use transfer::{FlatTransferPricing, TransferPricing, TransferTrigger};

use leadflow_core::errors::ApplicationError;
use leadflow_db::repositories::RepositoryError;

pub(crate) fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
