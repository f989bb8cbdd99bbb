//! Delivery-day gate backed by persisted settings.
//!
//! Operations staff toggle these keys directly; there is no cron here.
//! Absent keys mean "deliver every day".

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc, Weekday};

use leadflow_core::domain::entity::Entity;
use leadflow_core::errors::ApplicationError;
use leadflow_db::repositories::SettingsRepository;

use crate::persistence;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateDecision {
    pub enabled: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    fn open() -> Self {
        Self { enabled: true, reason: None }
    }

    fn closed(reason: String) -> Self {
        Self { enabled: false, reason: Some(reason) }
    }
}

pub fn delivery_days_key(entity: Entity) -> String {
    format!("delivery_days.{}", entity.as_str())
}

pub fn pause_key(entity: Entity) -> String {
    format!("dispatch.paused.{}", entity.as_str())
}

pub struct DeliveryCalendar {
    settings: Arc<dyn SettingsRepository>,
}

impl DeliveryCalendar {
    pub fn new(settings: Arc<dyn SettingsRepository>) -> Self {
        Self { settings }
    }

    /// Whether batch delivery may run for this entity today, and why not
    /// when it may not.
    pub async fn is_delivery_day_enabled(
        &self,
        entity: Entity,
        date: DateTime<Utc>,
    ) -> Result<GateDecision, ApplicationError> {
        let paused = self.settings.get(&pause_key(entity)).await.map_err(persistence)?;
        if paused.as_deref() == Some("true") {
            return Ok(GateDecision::closed(format!(
                "dispatch is paused for {}",
                entity.as_str()
            )));
        }

        let Some(days) = self.settings.get(&delivery_days_key(entity)).await.map_err(persistence)?
        else {
            return Ok(GateDecision::open());
        };

        let today = weekday_token(date.weekday());
        let allowed = days
            .split(',')
            .map(|token| token.trim().to_ascii_lowercase())
            .any(|token| token == today);
        if allowed {
            Ok(GateDecision::open())
        } else {
            Ok(GateDecision::closed(format!(
                "{today} is not a delivery day for {}",
                entity.as_str()
            )))
        }
    }
}

fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}
