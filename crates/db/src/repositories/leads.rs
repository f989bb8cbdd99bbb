use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::commande::CommandeId;
use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::lead::{Lead, LeadId, LeadQuality, LeadStatus};

use super::codec::{encode_opt_ts, encode_ts, parse_opt_ts, parse_ts};
use super::{
    BacklogCandidateQuery, DeliveredLeadRecord, LeadRepository, RepositoryError, WeeklyCounts,
};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, entity, phone, product, department, session_id, status, quality, \
     is_backlog, backlog_since, was_replaced, replacement_source, replacement_lead_id, \
     delivery_id, delivery_commande_id, delivered_to_client_id, delivered_at, routed_at, \
     created_at, updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id, entity, phone, product, department, session_id, status, quality,
                is_backlog, backlog_since, was_replaced, replacement_source,
                replacement_lead_id, delivery_id, delivery_commande_id,
                delivered_to_client_id, delivered_at, routed_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity = excluded.entity,
                phone = excluded.phone,
                product = excluded.product,
                department = excluded.department,
                session_id = excluded.session_id,
                status = excluded.status,
                quality = excluded.quality,
                is_backlog = excluded.is_backlog,
                backlog_since = excluded.backlog_since,
                was_replaced = excluded.was_replaced,
                replacement_source = excluded.replacement_source,
                replacement_lead_id = excluded.replacement_lead_id,
                delivery_id = excluded.delivery_id,
                delivery_commande_id = excluded.delivery_commande_id,
                delivered_to_client_id = excluded.delivered_to_client_id,
                delivered_at = excluded.delivered_at,
                routed_at = excluded.routed_at,
                updated_at = excluded.updated_at",
        )
        .bind(&lead.id.0)
        .bind(lead.entity.as_str())
        .bind(&lead.phone)
        .bind(&lead.product)
        .bind(lead.department.as_deref())
        .bind(lead.session_id.as_deref())
        .bind(lead.status.as_str())
        .bind(lead.quality.as_str())
        .bind(lead.is_backlog)
        .bind(encode_opt_ts(lead.backlog_since))
        .bind(lead.was_replaced)
        .bind(lead.replacement_source.as_deref())
        .bind(lead.replacement_lead_id.as_ref().map(|id| id.0.as_str()))
        .bind(lead.delivery_id.as_deref())
        .bind(lead.delivery_commande_id.as_deref())
        .bind(lead.delivered_to_client_id.as_deref())
        .bind(encode_opt_ts(lead.delivered_at))
        .bind(encode_opt_ts(lead.routed_at))
        .bind(encode_ts(lead.created_at))
        .bind(encode_ts(lead.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn exists_double_submit(
        &self,
        session_id: &str,
        phone: &str,
        exclude: &LeadId,
        submitted_after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM lead
             WHERE session_id = ? AND phone = ? AND id <> ? AND created_at >= ?",
        )
        .bind(session_id)
        .bind(phone)
        .bind(&exclude.0)
        .bind(encode_ts(submitted_after))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn find_delivered_since(
        &self,
        entity: Entity,
        phone: &str,
        product: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveredLeadRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, delivered_to_client_id, delivered_at FROM lead
             WHERE entity = ? AND phone = ? AND product = ? AND status = 'livre'
               AND delivered_to_client_id IS NOT NULL AND delivered_at >= ?
             ORDER BY delivered_at DESC",
        )
        .bind(entity.as_str())
        .bind(phone)
        .bind(product)
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeliveredLeadRecord {
                    lead_id: LeadId(row.try_get("id")?),
                    client_id: row.try_get("delivered_to_client_id")?,
                    delivered_at: parse_ts("delivered_at", row.try_get("delivered_at")?)?,
                })
            })
            .collect()
    }

    async fn find_backlog_candidates(
        &self,
        query: &BacklogCandidateQuery,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead
             WHERE entity = ? AND product = ? AND is_backlog = 1
               AND status IN ('new', 'no_open_orders', 'hold_source')
               AND id <> ? AND phone <> ''
               AND department IS NOT NULL AND department <> ''
             ORDER BY created_at ASC
             LIMIT ?"
        ))
        .bind(query.entity.as_str())
        .bind(&query.product)
        .bind(&query.exclude_lead_id.0)
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(lead_from_row).collect()
    }

    async fn try_reserve_for_replacement(
        &self,
        id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // Compare-and-swap on the status column: loses cleanly when a
        // concurrent reservation got there first.
        let result = sqlx::query(
            "UPDATE lead SET status = 'reserved_for_replacement', updated_at = ?
             WHERE id = ? AND is_backlog = 1
               AND status IN ('new', 'no_open_orders', 'hold_source')",
        )
        .bind(encode_ts(now))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn weekly_counts(
        &self,
        commande_id: &CommandeId,
        week_start: DateTime<Utc>,
    ) -> Result<WeeklyCounts, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS delivered, IFNULL(SUM(is_backlog), 0) AS backlog FROM lead
             WHERE delivery_commande_id = ? AND status IN ('routed', 'livre')
               AND routed_at >= ?",
        )
        .bind(&commande_id.0)
        .bind(encode_ts(week_start))
        .fetch_one(&self.pool)
        .await?;

        Ok(WeeklyCounts {
            delivered: super::codec::parse_u32("delivered", row.get::<i64, _>("delivered"))?,
            backlog: super::codec::parse_u32("backlog", row.get::<i64, _>("backlog"))?,
        })
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let entity_raw = row.try_get::<String, _>("entity")?;
    let entity = Entity::parse(&entity_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{entity_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = LeadStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{status_raw}`")))?;

    let quality_raw = row.try_get::<String, _>("quality")?;
    let quality = LeadQuality::parse(&quality_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead quality `{quality_raw}`")))?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        entity,
        phone: row.try_get("phone")?,
        product: row.try_get("product")?,
        department: row.try_get("department")?,
        session_id: row.try_get("session_id")?,
        status,
        quality,
        is_backlog: row.try_get("is_backlog")?,
        backlog_since: parse_opt_ts("backlog_since", row.try_get("backlog_since")?)?,
        was_replaced: row.try_get("was_replaced")?,
        replacement_source: row.try_get("replacement_source")?,
        replacement_lead_id: row
            .try_get::<Option<String>, _>("replacement_lead_id")?
            .map(LeadId),
        delivery_id: row.try_get("delivery_id")?,
        delivery_commande_id: row.try_get("delivery_commande_id")?,
        delivered_to_client_id: row.try_get("delivered_to_client_id")?,
        delivered_at: parse_opt_ts("delivered_at", row.try_get("delivered_at")?)?,
        routed_at: parse_opt_ts("routed_at", row.try_get("routed_at")?)?,
        created_at: parse_ts("created_at", row.try_get("created_at")?)?,
        updated_at: parse_ts("updated_at", row.try_get("updated_at")?)?,
    })
}
