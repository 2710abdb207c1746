use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use registrar::config::RegistrarConfig;
use registrar::db::EnrollmentDb;
use registrar::engine::RegistrarEngine;
use registrar::logging;
use registrar::notify::{LogNotifier, Notifier, WebhookNotifier};
use registrar::server::create_router;
use registrar::types::RegistrarState;
use tokio::net::TcpListener;
use tracing::{info, warn};

const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = RegistrarConfig::from_env().context("Failed to load configuration")?;
    info!(
        database = %config.database_path,
        credit_cap = config.credit_cap,
        "Starting registrar"
    );

    let db = Arc::new(
        EnrollmentDb::open(&config.database_path).context("Failed to open database")?,
    );

    let catalog = config
        .load_catalog_seed()
        .context("Failed to load catalog seed")?;
    for section in &catalog {
        db.upsert_section(section)
            .with_context(|| format!("Failed to seed section {}", section.id))?;
    }
    if !catalog.is_empty() {
        info!(sections = catalog.len(), "Seeded catalog");
    }

    let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), config.notifier_timeout())
                .context("Failed to build webhook notifier")?,
        ),
        None => {
            warn!("No notifier webhook configured, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let engine = RegistrarEngine::new(db, notifier, config.engine_settings());
    let bind_address = config.bind_address.clone();
    let state = Arc::new(RegistrarState::new(engine, config));

    let pruner = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            pruner.engine.prune_locks();
        }
    });

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!(address = %bind_address, "Listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
