use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::Entity;
use crate::domain::lead::LeadId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    PendingCsv,
    ReadyToSend,
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingCsv => "pending_csv",
            Self::ReadyToSend => "ready_to_send",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_csv" => Some(Self::PendingCsv),
            "ready_to_send" => Some(Self::ReadyToSend),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The fixed legal-transition table. `sent` is terminal; the edges out
    /// of `failed` are the retry paths.
    pub fn allowed_transitions(&self) -> &'static [DeliveryStatus] {
        match self {
            Self::PendingCsv => &[Self::ReadyToSend, Self::Sending, Self::Failed],
            Self::ReadyToSend => &[Self::Sending, Self::Failed],
            Self::Sending => &[Self::Sent, Self::Failed],
            Self::Sent => &[],
            Self::Failed => &[Self::PendingCsv, Self::Sending],
        }
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub const ALL: [DeliveryStatus; 5] =
        [Self::PendingCsv, Self::ReadyToSend, Self::Sending, Self::Sent, Self::Failed];
}

/// One batch unit: leads assigned to one client under one order, sent as
/// one CSV.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub entity: Entity,
    pub client_id: String,
    pub commande_id: String,
    pub lead_ids: Vec<LeadId>,
    pub product: String,
    pub status: DeliveryStatus,
    /// Destination emails; non-empty only once sent.
    pub sent_to: Vec<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub send_attempts: u32,
    pub last_error: Option<String>,
    pub sent_by: Option<String>,
    pub csv_content: Option<String>,
    pub csv_filename: Option<String>,
    pub csv_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn create(
        entity: Entity,
        client_id: impl Into<String>,
        commande_id: impl Into<String>,
        lead_ids: Vec<LeadId>,
        product: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if lead_ids.is_empty() {
            return Err(DomainError::InvariantViolation(
                "a delivery must reference at least one lead".to_string(),
            ));
        }

        Ok(Self {
            id: DeliveryId::generate(),
            entity,
            client_id: client_id.into(),
            commande_id: commande_id.into(),
            lead_ids,
            product: product.into(),
            status: DeliveryStatus::PendingCsv,
            sent_to: Vec::new(),
            last_sent_at: None,
            send_attempts: 0,
            last_error: None,
            sent_by: None,
            csv_content: None,
            csv_filename: None,
            csv_generated_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The hard "sent" invariant: status == sent iff sent_to is non-empty,
    /// last_sent_at is set and send_attempts >= 1. Checked before every
    /// write that sets `sent`.
    pub fn validate_sent_fields(
        delivery_id: &DeliveryId,
        sent_to: &[String],
        sent_at: Option<DateTime<Utc>>,
        send_attempts: u32,
    ) -> Result<(), DomainError> {
        if sent_to.is_empty() || sent_to.iter().all(|address| address.trim().is_empty()) {
            return Err(DomainError::SentInvariantViolation {
                delivery_id: delivery_id.0.clone(),
                condition: "sent_to must be a non-empty recipient list".to_string(),
            });
        }
        if sent_at.is_none() {
            return Err(DomainError::SentInvariantViolation {
                delivery_id: delivery_id.0.clone(),
                condition: "last_sent_at must be set".to_string(),
            });
        }
        if send_attempts < 1 {
            return Err(DomainError::SentInvariantViolation {
                delivery_id: delivery_id.0.clone(),
                condition: "send_attempts must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Delivery, DeliveryId, DeliveryStatus};
    use crate::domain::entity::Entity;
    use crate::domain::lead::LeadId;
    use crate::errors::DomainError;

    #[test]
    fn transition_table_matches_the_specified_edges() {
        use DeliveryStatus::*;
        let legal = [
            (PendingCsv, ReadyToSend),
            (PendingCsv, Sending),
            (PendingCsv, Failed),
            (ReadyToSend, Sending),
            (ReadyToSend, Failed),
            (Sending, Sent),
            (Sending, Failed),
            (Failed, PendingCsv),
            (Failed, Sending),
        ];

        for from in DeliveryStatus::ALL {
            for to in DeliveryStatus::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn sent_is_terminal() {
        assert!(DeliveryStatus::Sent.allowed_transitions().is_empty());
        assert!(DeliveryStatus::Sent.is_terminal());
    }

    #[test]
    fn create_rejects_empty_lead_set() {
        let result =
            Delivery::create(Entity::Zr7, "CL-1", "C-1", Vec::new(), "PV", Utc::now());
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn sent_fields_validation_rejects_each_missing_piece() {
        let id = DeliveryId("D-1".to_string());
        let now = Some(Utc::now());
        let recipients = vec!["ops@test".to_string()];

        assert!(Delivery::validate_sent_fields(&id, &[], now, 1).is_err());
        assert!(Delivery::validate_sent_fields(&id, &[" ".to_string()], now, 1).is_err());
        assert!(Delivery::validate_sent_fields(&id, &recipients, None, 1).is_err());
        assert!(Delivery::validate_sent_fields(&id, &recipients, now, 0).is_err());
        assert!(Delivery::validate_sent_fields(&id, &recipients, now, 1).is_ok());
    }

    #[test]
    fn fresh_delivery_starts_pending_csv_with_no_send_evidence() {
        let delivery = Delivery::create(
            Entity::Mdl,
            "CL-2",
            "C-9",
            vec![LeadId("L-1".to_string())],
            "PAC",
            Utc::now(),
        )
        .expect("valid delivery");

        assert_eq!(delivery.status, DeliveryStatus::PendingCsv);
        assert!(delivery.sent_to.is_empty());
        assert_eq!(delivery.send_attempts, 0);
        assert!(delivery.last_sent_at.is_none());
    }
}
