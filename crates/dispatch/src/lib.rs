//! CSV batch delivery: rendering, the delivery-day gate, the email
//! transport seam and the dispatcher that drives deliveries through the
//! state machine.

pub mod batch;
pub mod calendar;
pub mod transport;

pub use batch::{CsvBatchDispatcher, DispatchReport, DispatcherConfig};
pub use calendar::{DeliveryCalendar, GateDecision};
pub use transport::{EmailTransport, NoopEmailTransport, OutboundCsv, RecordingEmailTransport};

use leadflow_core::errors::ApplicationError;
use leadflow_db::repositories::RepositoryError;

pub(crate) fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
