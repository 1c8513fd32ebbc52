use axum::{routing::get, Router};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod assessment;
mod chat;
mod db;
mod error;
mod grants;
mod models;
mod presence;
mod progress;
mod routes;
mod session;
mod store;

const DEFAULT_PRESENCE_TIMEOUT_SECS: u64 = 90;
const PRESENCE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "liveclass_runtime=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::connect().await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = routes::AppState {
        db: pool,
        hub: Arc::new(session::SessionHub::new()),
    };

    let presence_timeout = Duration::from_secs(
        env::var("PRESENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PRESENCE_TIMEOUT_SECS),
    );
    tokio::spawn(sweep_presence(state.clone(), presence_timeout));

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let port: u16 = env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8081);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Evicts participants whose last heartbeat is older than the grace period
/// and mirrors each eviction into the stored participant set.
async fn sweep_presence(state: routes::AppState, timeout: Duration) {
    let mut ticker = tokio::time::interval(PRESENCE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        for session in state.hub.snapshot() {
            let evicted = session.evict_stale(timeout);
            if evicted.is_empty() {
                continue;
            }
            tracing::info!(
                class_id = %session.id,
                evicted = evicted.len(),
                "evicted silent participants"
            );
            if let Err(e) =
                store::set_participants(&state.db, session.id, &session.participants()).await
            {
                tracing::error!(error = %e, class_id = %session.id, "presence eviction write failed");
            }
        }
    }
}
