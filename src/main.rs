use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, signal, sync::mpsc};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool)
            .await
            .context("failed to run migrations")?;
    }
    let db = Arc::new(db_pool);

    // Payment gateway client
    let gateway: Arc<dyn api::gateway::PaymentGateway> =
        Arc::new(api::gateway::PaystackClient::new(&cfg.paystack)?);

    // Events + notification worker
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    let dispatcher = api::notifications::EmailDispatcher::start(
        Arc::new(api::notifications::LogMailer),
        cfg.email.clone(),
    );
    tokio::spawn(api::events::process_events(event_rx, dispatcher));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(db.clone(), &cfg, gateway, event_sender.clone());

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let router = api::app_router(state);

    let addr = cfg.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, environment = %cfg.environment, "storefront API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
