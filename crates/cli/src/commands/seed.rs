use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::commands::CommandResult;
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::client::{Client, ClientId};
use leadflow_core::domain::commande::{Commande, CommandeId, DepartmentScope};
use leadflow_core::domain::entity::Entity;
use leadflow_db::repositories::{
    ClientRepository, CommandeRepository, SettingsRepository, SqlClientRepository,
    SqlCommandeRepository, SqlSettingsRepository,
};
use leadflow_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let clients = SqlClientRepository::new(pool.clone());
        let commandes = SqlCommandeRepository::new(pool.clone());
        let settings = SqlSettingsRepository::new(pool.clone());
        let now = Utc::now();

        let seed_error = |error: leadflow_db::repositories::RepositoryError| {
            ("seed_execution", error.to_string(), 6u8)
        };

        for client in demo_clients(now) {
            clients.save(client).await.map_err(seed_error)?;
        }
        for commande in demo_commandes(now) {
            commandes.save(commande).await.map_err(seed_error)?;
        }
        settings.set("overlap_guard.enabled", "true", now).await.map_err(seed_error)?;

        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => {
            let message = [
                "demo dataset loaded:",
                "  - client client-zr7-acme (ZR7, Acme Renov)",
                "  - client client-mdl-maison (MDL, Maison Durable)",
                "  - commande commande-zr7-pv (ZR7, PV, quota 20, backlog 20%)",
                "  - commande commande-mdl-pac (MDL, PAC, quota 10)",
                "  - setting overlap_guard.enabled = true",
            ]
            .join("\n");
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn demo_clients(now: DateTime<Utc>) -> Vec<Client> {
    vec![
        Client {
            id: ClientId("client-zr7-acme".to_string()),
            entity: Entity::Zr7,
            name: "Acme Renov".to_string(),
            emails: vec!["ops@acme-renov.fr".to_string()],
            active: true,
            auto_send_enabled: true,
            created_at: now,
            updated_at: now,
        },
        Client {
            id: ClientId("client-mdl-maison".to_string()),
            entity: Entity::Mdl,
            name: "Maison Durable".to_string(),
            emails: vec!["leads@maison-durable.fr".to_string()],
            active: true,
            auto_send_enabled: true,
            created_at: now,
            updated_at: now,
        },
    ]
}

fn demo_commandes(now: DateTime<Utc>) -> Vec<Commande> {
    vec![
        Commande {
            id: CommandeId("commande-zr7-pv".to_string()),
            entity: Entity::Zr7,
            client_id: "client-zr7-acme".to_string(),
            product: "PV".to_string(),
            departments: DepartmentScope::All,
            weekly_quota: 20,
            price: Decimal::new(3500, 2),
            backlog_pct: 0.2,
            priority: 1,
            active: true,
            created_at: now,
            updated_at: now,
        },
        Commande {
            id: CommandeId("commande-mdl-pac".to_string()),
            entity: Entity::Mdl,
            client_id: "client-mdl-maison".to_string(),
            product: "PAC".to_string(),
            departments: DepartmentScope::All,
            weekly_quota: 10,
            price: Decimal::new(4200, 2),
            backlog_pct: 0.0,
            priority: 1,
            active: true,
            created_at: now,
            updated_at: now,
        },
    ]
}
