//! Mutation guard REST API server.

use guard_api::server::{self, AppState};
use guard_audit::JsonlAuditStore;
use guard_core::{GuardConfig, MutationGuard};
use guard_remote::HttpRecordApi;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GuardConfig::from_env();
    let audit_path =
        std::env::var("GUARD_AUDIT_PATH").unwrap_or_else(|_| "audit-log.jsonl".to_string());
    tracing::info!(
        audit_path = %audit_path,
        validation_ttl_secs = config.validation_ttl.num_seconds(),
        undo_window_days = config.undo_window.num_days(),
        bulk_max_records = config.bulk_max_records,
        "starting mutation guard"
    );

    let api = Arc::new(HttpRecordApi::from_env());
    let audit = Arc::new(JsonlAuditStore::new(&audit_path));
    let guard = MutationGuard::builder(api, audit).with_config(config).build();
    let state = Arc::new(AppState {
        guard: Arc::new(guard),
    });

    let app = server::router(state);
    let addr: SocketAddr = std::env::var("GUARD_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8002".to_string())
        .parse()?;
    tracing::info!("mutation guard API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
