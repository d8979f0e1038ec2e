//! Bootstrap entry point: parse config, build the in-process collaborator
//! graph, spawn the background loops, serve. There is no database to
//! migrate and no embedded admin UI to mount -- [`llmgate_storage::InMemoryRowStore`]
//! is this workspace's shipped reference store, and the admin surface is
//! a plain JSON API, not a bundled web UI.

mod cli;

use std::sync::Arc;

use clap::Parser;
use llmgate_core::account_pool::AccountPool;
use llmgate_core::config::GatewayConfig;
use llmgate_core::health_prober::{HealthProber, HealthProberConfig};
use llmgate_core::oauth::OAuthManager;
use llmgate_core::proxy_engine::{ProxyEngine, ProxyEngineConfig};
use llmgate_core::route_table::RouteTable;
use llmgate_core::upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
use llmgate_core::events::{EventHub, TracingEventSink};
use llmgate_router::oauth_session::OAuthSessionStore;
use llmgate_router::GatewayState;
use llmgate_storage::{InMemoryRowStore, RowStore};

const FATAL_CONFIG: i32 = 1;
const FATAL_STORAGE: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal startup error");
        eprintln!("fatal: {err}");
        std::process::exit(exit_code_for(&err));
    }
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("config: {0}")]
    Config(#[from] llmgate_core::config::ConfigError),
    #[error("master key: {0}")]
    MasterKey(#[from] llmgate_crypto::MasterKeyError),
    #[error("upstream client: {0}")]
    UpstreamClient(String),
    #[error("bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("serve: {0}")]
    Serve(std::io::Error),
}

/// Exit codes: `1` for a fatal config error, `2` for anything else fatal
/// at startup (this gateway's only storage backend is in-process and
/// infallible, so `2` covers the upstream-client/bind/serve failures a real
/// database adapter would also surface here).
fn exit_code_for(err: &StartupError) -> i32 {
    match err {
        StartupError::Config(_) | StartupError::MasterKey(_) => FATAL_CONFIG,
        _ => FATAL_STORAGE,
    }
}

async fn run() -> Result<(), StartupError> {
    let cli = cli::Cli::parse();
    let config = build_config(&cli)?;
    config.validate()?;

    // InMemoryRowStore is the only RowStore this workspace ships; a
    // concrete sea-orm/Postgres adapter is explicitly out of scope.
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());

    let events = EventHub::default();
    events.add_sink(Arc::new(TracingEventSink)).await;

    let pool = Arc::new(AccountPool::new(store.clone(), config.snapshot_ttl));
    let routes = Arc::new(RouteTable::new());
    llmgate_router::reload_routes(store.as_ref(), &routes).await;

    let upstream_cfg = UpstreamClientConfig {
        connect_timeout: config.connect_timeout,
        unary_timeout: config.unary_timeout,
        stream_idle_timeout: config.stream_idle_timeout,
    };
    let upstream_client: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(upstream_cfg).map_err(|e| StartupError::UpstreamClient(e.to_string()))?);

    let oauth = Arc::new(OAuthManager::new(pool.clone(), upstream_client.clone(), config.oauth.clone()));

    let prober = Arc::new(HealthProber::new(
        pool.clone(),
        upstream_client.clone(),
        config.encryption_master_key.clone(),
        HealthProberConfig {
            interval: config.health_probe_interval,
            concurrency: config.health_probe_concurrency,
            probe_timeout: config.probe_timeout,
        },
    ));

    let engine = Arc::new(ProxyEngine::new(
        pool.clone(),
        routes.clone(),
        oauth.clone(),
        upstream_client.clone(),
        store.clone(),
        events.clone(),
        config.encryption_master_key.clone(),
        ProxyEngineConfig { strategy: config.default_strategy, min_health_score: config.min_health_score },
    ));

    let state = GatewayState {
        engine,
        pool: pool.clone(),
        routes,
        oauth,
        prober: prober.clone(),
        store,
        events,
        master_key: config.encryption_master_key.clone(),
        oauth_urls: config.oauth.clone(),
        oauth_sessions: Arc::new(OAuthSessionStore::new()),
        admin_key: cli.admin_key.clone(),
        concurrency_limiter: Arc::new(tokio::sync::Semaphore::new(config.worker_pool_size)),
    };

    tokio::spawn(pool.clone().run_sweep_loop());
    tokio::spawn(prober.clone().run_loop());
    tokio::spawn(sweep_oauth_sessions(state.oauth_sessions.clone()));

    let app = llmgate_router::build_router(state);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| StartupError::Bind(bind.clone(), e))?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await.map_err(StartupError::Serve)?;
    Ok(())
}

fn build_config(cli: &cli::Cli) -> Result<GatewayConfig, StartupError> {
    let mut config = GatewayConfig::default();
    config.default_strategy = cli::parse_strategy(&cli.strategy);
    config.min_health_score = cli.min_health_score;
    config.outbound_proxies = cli.proxies.clone();

    config.encryption_master_key = match &cli.master_key {
        Some(value) => llmgate_crypto::MasterKey::from_config_str(value)?,
        None => {
            let generated = llmgate_crypto::MasterKey::generate();
            tracing::warn!("no --master-key given, generated an ephemeral one for this run only");
            generated
        }
    };
    config.jwt_secret = match &cli.jwt_secret {
        Some(value) => value.as_bytes().to_vec(),
        None => vec![0u8; 32],
    };

    Ok(config)
}

async fn sweep_oauth_sessions(sessions: Arc<OAuthSessionStore>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        sessions.sweep_expired().await;
    }
}
