use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::entity::Entity;
use leadflow_core::domain::transfer::{IntercompanyTransfer, TransferId, TransferStatus};

use super::codec::{encode_ts, parse_decimal, parse_ts};
use super::{RepositoryError, TransferRepository};
use crate::DbPool;

const TRANSFER_COLUMNS: &str = "id, lead_id, delivery_id, commande_id, from_entity, to_entity, \
     product, unit_price, status, week_key, created_at";

pub struct SqlTransferRepository {
    pool: DbPool,
}

impl SqlTransferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TransferRepository for SqlTransferRepository {
    async fn insert_if_absent(
        &self,
        transfer: IntercompanyTransfer,
    ) -> Result<bool, RepositoryError> {
        // The UNIQUE(delivery_id) constraint makes creation idempotent.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO intercompany_transfer (
                id, lead_id, delivery_id, commande_id, from_entity, to_entity,
                product, unit_price, status, week_key, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transfer.id.0)
        .bind(&transfer.lead_id)
        .bind(&transfer.delivery_id)
        .bind(&transfer.commande_id)
        .bind(transfer.from_entity.as_str())
        .bind(transfer.to_entity.as_str())
        .bind(&transfer.product)
        .bind(transfer.unit_price.to_string())
        .bind(transfer.status.as_str())
        .bind(&transfer.week_key)
        .bind(encode_ts(transfer.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_delivery_id(
        &self,
        delivery_id: &str,
    ) -> Result<Option<IntercompanyTransfer>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM intercompany_transfer WHERE delivery_id = ?"
        ))
        .bind(delivery_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(transfer_from_row).transpose()
    }
}

fn transfer_from_row(row: SqliteRow) -> Result<IntercompanyTransfer, RepositoryError> {
    let from_raw = row.try_get::<String, _>("from_entity")?;
    let from_entity = Entity::parse(&from_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{from_raw}`")))?;
    let to_raw = row.try_get::<String, _>("to_entity")?;
    let to_entity = Entity::parse(&to_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{to_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = TransferStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown transfer status `{status_raw}`"))
    })?;

    Ok(IntercompanyTransfer {
        id: TransferId(row.try_get("id")?),
        lead_id: row.try_get("lead_id")?,
        delivery_id: row.try_get("delivery_id")?,
        commande_id: row.try_get("commande_id")?,
        from_entity,
        to_entity,
        product: row.try_get("product")?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        status,
        week_key: row.try_get("week_key")?,
        created_at: parse_ts("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use leadflow_core::domain::entity::Entity;
    use leadflow_core::domain::transfer::IntercompanyTransfer;

    use super::SqlTransferRepository;
    use crate::migrations;
    use crate::repositories::TransferRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let url = format!("sqlite:file:{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let pool = connect_with_settings(&url, 2, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn transfer() -> IntercompanyTransfer {
        IntercompanyTransfer::pending(
            "L-1",
            "D-1",
            "C-1",
            Entity::Zr7,
            Entity::Mdl,
            "PV",
            Decimal::new(1200, 2),
            "2026-W35",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn creation_is_idempotent_per_delivery() {
        let pool = setup_pool().await;
        let repo = SqlTransferRepository::new(pool.clone());

        let first = transfer();
        assert!(repo.insert_if_absent(first.clone()).await.expect("first insert"));

        // Second trigger for the same delivery is a no-op.
        assert!(!repo.insert_if_absent(transfer()).await.expect("second insert"));

        let stored = repo.find_by_delivery_id("D-1").await.expect("find").expect("exists");
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.unit_price, Decimal::new(1200, 2));

        pool.close().await;
    }
}
