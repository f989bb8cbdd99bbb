//! Email transport seam.
//!
//! The dispatcher only knows this trait; what actually carries the CSV
//! (SMTP relay, API, a log line in development) is wired at the edge.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("recipient list is empty")]
    NoRecipients,
    #[error("transport rejected the message: {0}")]
    Rejected(String),
}

/// One CSV attachment on its way to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundCsv {
    pub to: Vec<String>,
    pub subject: String,
    pub csv_filename: String,
    pub csv_content: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_csv(&self, message: &OutboundCsv) -> Result<(), TransportError>;
}

/// Logs the send and succeeds. Used in development and by `doctor` runs
/// where no relay is configured.
pub struct NoopEmailTransport {
    from_address: String,
}

impl NoopEmailTransport {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self { from_address: from_address.into() }
    }
}

#[async_trait]
impl EmailTransport for NoopEmailTransport {
    async fn send_csv(&self, message: &OutboundCsv) -> Result<(), TransportError> {
        if message.to.is_empty() {
            return Err(TransportError::NoRecipients);
        }
        info!(
            event_name = "transport.noop_send",
            from = %self.from_address,
            to = %message.to.join(","),
            filename = %message.csv_filename,
            bytes = message.csv_content.len(),
        );
        Ok(())
    }
}

/// Captures every message for assertions; optionally fails each send.
#[derive(Default)]
pub struct RecordingEmailTransport {
    sent: std::sync::Mutex<Vec<OutboundCsv>>,
    reject_with: Option<String>,
}

impl RecordingEmailTransport {
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self { sent: std::sync::Mutex::new(Vec::new()), reject_with: Some(message.into()) }
    }

    pub fn sent(&self) -> Vec<OutboundCsv> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmailTransport {
    async fn send_csv(&self, message: &OutboundCsv) -> Result<(), TransportError> {
        if message.to.is_empty() {
            return Err(TransportError::NoRecipients);
        }
        if let Some(reason) = &self.reject_with {
            return Err(TransportError::Rejected(reason.clone()));
        }
        self.sent.lock().expect("transport mutex poisoned").push(message.clone());
        Ok(())
    }
}
