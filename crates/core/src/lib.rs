pub mod backfill;
pub mod config;
pub mod csv;
pub mod domain;
pub mod errors;
pub mod week;

pub use backfill::{backlog_needed, next_unit_is_backlog};
pub use domain::client::{Client, ClientId};
pub use domain::commande::{Commande, CommandeId, DepartmentScope};
pub use domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
pub use domain::entity::Entity;
pub use domain::lead::{Lead, LeadId, LeadQuality, LeadStatus, NewLead};
pub use domain::transfer::{IntercompanyTransfer, TransferId, TransferStatus};
pub use errors::{ApplicationError, DomainError};

// Re-exported so downstream crates agree on the chrono version.
pub use chrono;
