use std::sync::Arc;

use chrono::Utc;

use crate::commands::CommandResult;
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::entity::Entity;
use leadflow_db::repositories::{
    SqlClientRepository, SqlDeliveryRepository, SqlLeadRepository, SqlSettingsRepository,
    SqlTransferRepository,
};
use leadflow_db::{connect_with_settings, migrations};
use leadflow_dispatch::{
    CsvBatchDispatcher, DeliveryCalendar, DispatchReport, DispatcherConfig, NoopEmailTransport,
};
use leadflow_routing::{DeliveryStateMachine, FlatTransferPricing, TransferTrigger};

pub fn run(entity: &str) -> CommandResult {
    let Some(entity) = Entity::parse(entity) else {
        return CommandResult::failure(
            "dispatch",
            "invalid_entity",
            format!("unknown entity `{entity}` (expected ZR7 or MDL)"),
            2,
        );
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "dispatch",
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
                "dispatch",
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

        let leads = Arc::new(SqlLeadRepository::new(pool.clone()));
        let clients = Arc::new(SqlClientRepository::new(pool.clone()));
        let deliveries = Arc::new(SqlDeliveryRepository::new(pool.clone()));
        let settings = Arc::new(SqlSettingsRepository::new(pool.clone()));
        let transfers = Arc::new(SqlTransferRepository::new(pool.clone()));

        let dispatcher = CsvBatchDispatcher::new(
            Arc::clone(&deliveries) as _,
            Arc::clone(&clients) as _,
            Arc::clone(&leads) as _,
            DeliveryStateMachine::new(Arc::clone(&deliveries) as _, Arc::clone(&leads) as _),
            TransferTrigger::new(
                transfers,
                Arc::clone(&leads) as _,
                Arc::new(FlatTransferPricing::default()),
            ),
            DeliveryCalendar::new(settings),
            Arc::new(NoopEmailTransport::new(config.dispatch.from_address.clone())),
            DispatcherConfig::default(),
        );

        let report =
            dispatcher.run(entity, Utc::now()).await.map_err(|error| {
                ("dispatch_run", error.to_string(), 6u8)
            })?;

        pool.close().await;
        Ok::<DispatchReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => {
            let message = match report.skipped {
                Some(reason) => format!("dispatch skipped: {reason}"),
                None => format!(
                    "dispatch complete for {}: rendered {}, sent {}, held {}, failed {}",
                    entity.as_str(),
                    report.rendered,
                    report.sent,
                    report.held,
                    report.failed
                ),
            };
            CommandResult::success("dispatch", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("dispatch", error_class, message, exit_code)
        }
    }
}
