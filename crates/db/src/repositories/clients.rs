use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::entity::Entity;

use super::codec::{encode_string_list, encode_ts, parse_string_list, parse_ts};
use super::{ClientRepository, RepositoryError};
use crate::DbPool;

const CLIENT_COLUMNS: &str =
    "id, entity, name, emails_json, active, auto_send_enabled, created_at, updated_at";

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CLIENT_COLUMNS} FROM client WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(client_from_row).transpose()
    }

    async fn save(&self, client: Client) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO client (
                id, entity, name, emails_json, active, auto_send_enabled,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity = excluded.entity,
                name = excluded.name,
                emails_json = excluded.emails_json,
                active = excluded.active,
                auto_send_enabled = excluded.auto_send_enabled,
                updated_at = excluded.updated_at",
        )
        .bind(&client.id.0)
        .bind(client.entity.as_str())
        .bind(&client.name)
        .bind(encode_string_list(&client.emails))
        .bind(client.active)
        .bind(client.auto_send_enabled)
        .bind(encode_ts(client.created_at))
        .bind(encode_ts(client.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active_by_entity(&self, entity: Entity) -> Result<Vec<Client>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM client WHERE entity = ? AND active = 1 ORDER BY id ASC"
        ))
        .bind(entity.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(client_from_row).collect()
    }
}

fn client_from_row(row: SqliteRow) -> Result<Client, RepositoryError> {
    let entity_raw = row.try_get::<String, _>("entity")?;
    let entity = Entity::parse(&entity_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity `{entity_raw}`")))?;

    Ok(Client {
        id: ClientId(row.try_get("id")?),
        entity,
        name: row.try_get("name")?,
        emails: parse_string_list("emails_json", row.try_get("emails_json")?)?,
        active: row.try_get("active")?,
        auto_send_enabled: row.try_get("auto_send_enabled")?,
        created_at: parse_ts("created_at", row.try_get("created_at")?)?,
        updated_at: parse_ts("updated_at", row.try_get("updated_at")?)?,
    })
}
