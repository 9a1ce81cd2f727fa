mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use dojo_common::config::Config;
use dojo_common::memory::{MemoryStore, Seed};
use dojo_common::redis::RedisStore;
use dojo_common::store::Store;
use dojo_grader::Validator;
use metrics::Metrics;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub validator: Arc<Validator>,
    pub store: Arc<dyn Store>,
    pub metrics: Metrics,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new().merge(routes::routes()).with_state(state)
}

/// Redis when `REDIS_URL` is set, otherwise an in-process store.
/// A seed file, if configured, is loaded into whichever one is used.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let seed = match &config.seed_path {
        Some(path) => Some(Seed::load(path)?),
        None => None,
    };

    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            info!("Connected to Redis: {}", url);
            if let Some(seed) = &seed {
                store.load_seed(seed).await.context("Failed to seed Redis")?;
                info!(problems = seed.problems.len(), "Seed loaded into Redis");
            }
            Ok(Arc::new(store))
        }
        None => {
            warn!("REDIS_URL not set, progress is kept in memory only");
            let seed = seed.unwrap_or_default();
            info!(problems = seed.problems.len(), users = seed.users.len(), "In-memory store ready");
            Ok(Arc::new(MemoryStore::from_seed(seed)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber; DOJO_LOG_FORMAT=json for log shippers
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false);
    if std::env::var("DOJO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Dojo API booting...");

    let config = Config::from_env();
    let store = open_store(&config).await?;
    let validator = Validator::from_config(&config, store.clone())?;

    let state = Arc::new(AppState {
        validator: Arc::new(validator),
        store,
        metrics: Metrics::new().context("Failed to register metrics")?,
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(
        validate_timeout_ms = config.validate_timeout_ms,
        run_timeout_ms = config.run_timeout_ms,
        locale = %config.locale,
        "HTTP server listening on {}",
        config.bind_addr
    );

    axum::serve(listener, app(state)).await.context("Server error")?;
    Ok(())
}
