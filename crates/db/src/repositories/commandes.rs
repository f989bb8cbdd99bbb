use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
use leadflow_core::domain::entity::Entity;

use super::codec::{encode_string_list, encode_ts, parse_decimal, parse_string_list, parse_ts};
use super::{CommandeRepository, RepositoryError};
use crate::DbPool;

const COMMANDE_COLUMNS: &str = "id, entity, client_id, product, departments_json, weekly_quota, \
     price, backlog_pct, priority, active, created_at, updated_at";

pub struct SqlCommandeRepository {
    pool: DbPool,
}

impl SqlCommandeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CommandeRepository for SqlCommandeRepository {
    async fn find_by_id(&self, id: &CommandeId) -> Result<Option<Commande>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COMMANDE_COLUMNS} FROM commande WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(commande_from_row).transpose()
    }

    async fn save(&self, commande: Commande) -> Result<(), RepositoryError> {
        let departments_json = match &commande.departments {
            DepartmentScope::All => None,
            DepartmentScope::List(departments) => Some(encode_string_list(departments)),
        };

        sqlx::query(
            "INSERT INTO commande (
                id, entity, client_id, product, departments_json, weekly_quota,
                price, backlog_pct, priority, active, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity = excluded.entity,
                client_id = excluded.client_id,
                product = excluded.product,
                departments_json = excluded.departments_json,
                weekly_quota = excluded.weekly_quota,
                price = excluded.price,
                backlog_pct = excluded.backlog_pct,
                priority = excluded.priority,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&commande.id.0)
        .bind(commande.entity.as_str())
        .bind(&commande.client_id)
        .bind(&commande.product)
        .bind(departments_json)
        .bind(i64::from(commande.weekly_quota))
        .bind(commande.price.to_string())
        .bind(commande.backlog_pct)
        .bind(i64::from(commande.priority))
        .bind(commande.active)
        .bind(encode_ts(commande.created_at))
        .bind(encode_ts(commande.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active(
        &self,
        entity: Entity,
        product: &str,
    ) -> Result<Vec<Commande>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMANDE_COLUMNS} FROM commande
             WHERE entity = ? AND product = ? AND active = 1
             ORDER BY priority ASC, id ASC"
        ))
        .bind(entity.as_str())
        .bind(product)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(commande_from_row).collect()
    }
}

fn commande_from_row(row: SqliteRow) -> Result<Commande, RepositoryError> {
    let entity_raw = row.try_get::<String, _>("entity")?;
    let entity = Entity::parse(&entity_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{entity_raw}`")))?;

    let departments = match row.try_get::<Option<String>, _>("departments_json")? {
        None => DepartmentScope::All,
        Some(raw) => DepartmentScope::List(parse_string_list("departments_json", raw)?),
    };

    Ok(Commande {
        id: CommandeId(row.try_get("id")?),
        entity,
        client_id: row.try_get("client_id")?,
        product: row.try_get("product")?,
        departments,
        weekly_quota: super::codec::parse_u32("weekly_quota", row.try_get("weekly_quota")?)?,
        price: parse_decimal("price", row.try_get("price")?)?,
        backlog_pct: row.try_get("backlog_pct")?,
        priority: i32::try_from(row.try_get::<i64, _>("priority")?).map_err(|_| {
            RepositoryError::Decode("priority out of i32 range".to_string())
        })?,
        active: row.try_get("active")?,
        created_at: parse_ts("created_at", row.try_get("created_at")?)?,
        updated_at: parse_ts("updated_at", row.try_get("updated_at")?)?,
    })
}
