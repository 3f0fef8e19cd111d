/**
 * CLUSTERDASH - Point d'entrée du dashboard
 *
 * RÔLE : Bootstrap d'une session : config, connexion WebSocket partagée,
 * pollers par classe, API REST locale. Ctrl-C démonte la session proprement.
 */

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clusterdash::config::load_config;
use clusterdash::connection::run_connection;
use clusterdash::gateway::GatewayApi;
use clusterdash::health::ConnectionHealth;
use clusterdash::http::{build_router, AppState};
use clusterdash::{DashboardSession, ResourceClass, SessionOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clusterdash=info")))
        .init();

    let cfg = load_config().await;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = DashboardSession::new(outbound_tx, SessionOptions::from(&cfg));
    let health = ConnectionHealth::new();
    let shutdown = CancellationToken::new();

    let dispatcher = Arc::new(session.dispatcher());
    let connection = tokio::spawn(run_connection(
        cfg.gateway.websocket_url.clone(),
        outbound_rx,
        dispatcher,
        health.clone(),
        shutdown.clone(),
        Duration::from_secs(cfg.gateway.reconnect_backoff_secs),
    ));

    let gateway = GatewayApi::new(cfg.gateway.http_base_url.clone(), Duration::from_secs(cfg.gateway.http_timeout_secs))
        .context("building gateway HTTP client")?;

    for class in ResourceClass::ALL {
        let fetcher = match gateway.fetcher(class) {
            Some(f) => f,
            None => session.workloads_fetcher(),
        };
        session.start_polling(class, cfg.polling.interval(class), fetcher);
    }

    let app = build_router(AppState { session: session.clone(), gateway, health });
    let listener = TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    info!("listening on http://{}", cfg.server.bind);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            stop.cancel();
        })
        .await
        .context("HTTP server")?;

    session.teardown();
    shutdown.cancel();
    let _ = connection.await;
    info!("clusterdash stopped");
    Ok(())
}
