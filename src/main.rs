//! SportsGameOdds Ingestion Service
//!
//! Pulls upcoming events with alternate lines from the SportsGameOdds API,
//! normalizes every odd into flat records, and bulk-inserts them into the
//! bet-tracker Postgres database. Runs once per invocation by default
//! (scheduled-job mode); set RUN_ONCE=false for a polling service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info};

use sgo_ingestion::api::OddsApiClient;
use sgo_ingestion::config::Config;
use sgo_ingestion::pipeline;
use sgo_ingestion::store::PgStore;

/// Service health state served by the /health endpoint.
#[derive(Clone)]
struct HealthState {
    last_run_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_run_inserted: Arc<RwLock<u64>>,
    error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    fn new() -> Self {
        Self {
            last_run_time: Arc::new(RwLock::new(None)),
            last_run_inserted: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
        }
    }

    async fn record_success(&self, inserted: u64) {
        *self.last_run_time.write().await = Some(Utc::now());
        *self.last_run_inserted.write().await = inserted;
        *self.error_count.write().await = 0;
    }

    async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

async fn health_handler(
    axum::extract::State(health): axum::extract::State<HealthState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let last_run = health.last_run_time.read().await;
    let last_inserted = health.last_run_inserted.read().await;
    let errors = health.error_count.read().await;

    let status = if *errors > 5 { "degraded" } else { "ok" };
    let http_status = if *errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "sgo-ingestion",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_run": last_run.map(|t| t.to_rfc3339()),
            "last_run_inserted": *last_inserted,
            "consecutive_errors": *errors
        })),
    )
}

/// Continuous mode: one ingestion pass per poll interval.
async fn poll_loop(
    client: &OddsApiClient,
    store: &PgStore,
    config: &Config,
    health: &HealthState,
) {
    info!(
        "Starting ingestion loop (poll interval: {}s)",
        config.poll_interval_seconds
    );

    loop {
        let start = std::time::Instant::now();

        match pipeline::run_once(client, store, config).await {
            Ok(stats) => {
                health.record_success(stats.total_inserted).await;
                info!(
                    "Run completed: {} inserted in {:?}",
                    stats.total_inserted,
                    start.elapsed()
                );
            }
            Err(e) => {
                health.record_error().await;
                error!("Run failed: {:?}", e);
            }
        }

        tokio::time::sleep(Duration::from_secs(config.poll_interval_seconds)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sgo_ingestion=info".parse().unwrap()),
        )
        .init();

    info!(
        "SportsGameOdds Ingestion Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let store = PgStore::connect_with_retry(&config.database_url, 5).await?;
    store.ensure_schema().await?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(5)
        .build()
        .context("Failed to create HTTP client")?;
    let client = OddsApiClient::new(
        http_client,
        config.api_base_url.clone(),
        config.odds_api_key.clone(),
    );

    let health = HealthState::new();

    // Health check server
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(health.clone());

    let health_addr = format!("0.0.0.0:{}", config.health_port);
    info!("Health endpoint listening on {}", health_addr);
    let listener = tokio::net::TcpListener::bind(&health_addr).await?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server error: {:?}", e);
        }
    });

    // One-shot mode (scheduled invocation)
    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        match pipeline::run_once(&client, &store, &config).await {
            Ok(stats) => {
                health.record_success(stats.total_inserted).await;
                info!(
                    "One-shot run completed: {} records inserted",
                    stats.total_inserted
                );
            }
            Err(e) => {
                error!("One-shot run failed: {:?}", e);
                return Err(e);
            }
        }
        return Ok(());
    }

    // Continuous mode with graceful shutdown
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = poll_loop(&client, &store, &config, &health) => {}
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
