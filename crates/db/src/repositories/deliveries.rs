use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::client::ClientId;
use leadflow_core::domain::delivery::{Delivery, DeliveryId, DeliveryStatus};
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::LeadId;

use super::codec::{
    encode_opt_ts, encode_string_list, encode_ts, parse_opt_ts, parse_string_list, parse_ts,
    parse_u32,
};
use super::{DeliveryRepository, RepositoryError, SentFields};
use crate::DbPool;

const DELIVERY_COLUMNS: &str = "id, entity, client_id, commande_id, lead_ids_json, product, \
     status, sent_to_json, last_sent_at, send_attempts, last_error, sent_by, csv_content, \
     csv_filename, csv_generated_at, created_at, updated_at";

pub struct SqlDeliveryRepository {
    pool: DbPool,
}

impl SqlDeliveryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeliveryRepository for SqlDeliveryRepository {
    async fn find_by_id(&self, id: &DeliveryId) -> Result<Option<Delivery>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DELIVERY_COLUMNS} FROM delivery WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(delivery_from_row).transpose()
    }

    async fn save(&self, delivery: Delivery) -> Result<(), RepositoryError> {
        let lead_ids: Vec<String> =
            delivery.lead_ids.iter().map(|lead_id| lead_id.0.clone()).collect();

        sqlx::query(
            "INSERT INTO delivery (
                id, entity, client_id, commande_id, lead_ids_json, product, status,
                sent_to_json, last_sent_at, send_attempts, last_error, sent_by,
                csv_content, csv_filename, csv_generated_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity = excluded.entity,
                client_id = excluded.client_id,
                commande_id = excluded.commande_id,
                lead_ids_json = excluded.lead_ids_json,
                product = excluded.product,
                status = excluded.status,
                sent_to_json = excluded.sent_to_json,
                last_sent_at = excluded.last_sent_at,
                send_attempts = excluded.send_attempts,
                last_error = excluded.last_error,
                sent_by = excluded.sent_by,
                csv_content = excluded.csv_content,
                csv_filename = excluded.csv_filename,
                csv_generated_at = excluded.csv_generated_at,
                updated_at = excluded.updated_at",
        )
        .bind(&delivery.id.0)
        .bind(delivery.entity.as_str())
        .bind(&delivery.client_id)
        .bind(&delivery.commande_id)
        .bind(encode_string_list(&lead_ids))
        .bind(&delivery.product)
        .bind(delivery.status.as_str())
        .bind(encode_string_list(&delivery.sent_to))
        .bind(encode_opt_ts(delivery.last_sent_at))
        .bind(i64::from(delivery.send_attempts))
        .bind(delivery.last_error.as_deref())
        .bind(delivery.sent_by.as_deref())
        .bind(delivery.csv_content.as_deref())
        .bind(delivery.csv_filename.as_deref())
        .bind(encode_opt_ts(delivery.csv_generated_at))
        .bind(encode_ts(delivery.created_at))
        .bind(encode_ts(delivery.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_status(
        &self,
        entity: Entity,
        status: DeliveryStatus,
    ) -> Result<Vec<Delivery>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM delivery
             WHERE entity = ? AND status = ?
             ORDER BY created_at ASC"
        ))
        .bind(entity.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    async fn any_sent_to_clients_since(
        &self,
        client_ids: &[ClientId],
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if client_ids.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; client_ids.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) AS count FROM delivery
             WHERE status = 'sent' AND last_sent_at >= ? AND client_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(encode_ts(since));
        for client_id in client_ids {
            query = query.bind(&client_id.0);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn set_ready_to_send(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        csv_content: &str,
        csv_filename: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE delivery SET status = 'ready_to_send', csv_content = ?, csv_filename = ?,
                                 csv_generated_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(csv_content)
        .bind(csv_filename)
        .bind(encode_ts(now))
        .bind(encode_ts(now))
        .bind(&id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_sending(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE delivery SET status = 'sending', updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(encode_ts(now))
        .bind(&id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_sent(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        fields: &SentFields,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE delivery SET status = 'sent', sent_to_json = ?, last_sent_at = ?,
                                 send_attempts = ?, sent_by = ?, last_error = NULL,
                                 updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(encode_string_list(&fields.sent_to))
        .bind(encode_ts(fields.sent_at))
        .bind(i64::from(fields.send_attempts))
        .bind(fields.sent_by.as_deref())
        .bind(encode_ts(now))
        .bind(&id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_failed(
        &self,
        id: &DeliveryId,
        from: DeliveryStatus,
        error: &str,
        increment_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE delivery SET status = 'failed', last_error = ?,
                                 send_attempts = send_attempts + ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(error)
        .bind(i64::from(increment_attempts))
        .bind(encode_ts(now))
        .bind(&id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn delivery_from_row(row: SqliteRow) -> Result<Delivery, RepositoryError> {
    let entity_raw = row.try_get::<String, _>("entity")?;
    let entity = Entity::parse(&entity_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{entity_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = DeliveryStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown delivery status `{status_raw}`"))
    })?;

    let lead_ids = parse_string_list("lead_ids_json", row.try_get("lead_ids_json")?)?
        .into_iter()
        .map(LeadId)
        .collect();

    Ok(Delivery {
        id: DeliveryId(row.try_get("id")?),
        entity,
        client_id: row.try_get("client_id")?,
        commande_id: row.try_get("commande_id")?,
        lead_ids,
        product: row.try_get("product")?,
        status,
        sent_to: parse_string_list("sent_to_json", row.try_get("sent_to_json")?)?,
        last_sent_at: parse_opt_ts("last_sent_at", row.try_get("last_sent_at")?)?,
        send_attempts: parse_u32("send_attempts", row.try_get("send_attempts")?)?,
        last_error: row.try_get("last_error")?,
        sent_by: row.try_get("sent_by")?,
        csv_content: row.try_get("csv_content")?,
        csv_filename: row.try_get("csv_filename")?,
        csv_generated_at: parse_opt_ts("csv_generated_at", row.try_get("csv_generated_at")?)?,
        created_at: parse_ts("created_at", row.try_get("created_at")?)?,
        updated_at: parse_ts("updated_at", row.try_get("updated_at")?)?,
    })
}
