//! Idle scheduler control server: status, pause/resume/stop, task removal, classification and
//! queueing of deferred work.

use idle_api::server::{self, AppState};
use idle_classify::ClassificationRules;
use idle_scheduler::{IdleTaskScheduler, SchedulerConfig, TaskScheduler};
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

    let config = SchedulerConfig::from_env()?;
    tracing::info!(?config, "scheduler config loaded");
    let scheduler = Arc::new(IdleTaskScheduler::with_timer_fallback(config));
    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        rules: ClassificationRules::default(),
    });

    let app = server::router(state);
    let addr: SocketAddr = std::env::var("IDLE_API_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8002".to_string())
        .parse()?;
    tracing::info!("idle scheduler API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    scheduler.cleanup();
    Ok(())
}
