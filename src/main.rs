//! Cascade HTTP server entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tokio::signal;

use cascade::background::{BackgroundScheduler, TokioScheduler};
use cascade::cache::{CacheResolver, FsOriginStore, LocalCache, MemoryKvStore, ResolverConfig};
use cascade::config::Config;
use cascade::constants::SHUTDOWN_DRAIN_GRACE;
use cascade::gateway::{HandlerState, create_router_with_state};
use cascade::telemetry::{HttpSink, TelemetryBatcher, TelemetrySink, TracingSink};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--health-check") {
        std::process::exit(run_health_check());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    let addr: SocketAddr = config.socket_addr().parse()?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        origin_root = %config.origin_root.display(),
        "Cascade starting"
    );

    let scheduler = TokioScheduler::new();
    let shared_scheduler: Arc<dyn BackgroundScheduler> = Arc::new(scheduler.clone());

    let sink: Arc<dyn TelemetrySink> =
        match (&config.telemetry_dataset, &config.telemetry_api_key) {
            (Some(dataset), Some(api_key)) => {
                tracing::info!(dataset = %dataset, "Shipping telemetry to {}", config.telemetry_url);
                Arc::new(HttpSink::new(&config.telemetry_url, dataset, api_key.clone())?)
            }
            _ => {
                tracing::warn!("No CASCADE_TELEMETRY_API_KEY configured, telemetry goes to the process log");
                Arc::new(TracingSink)
            }
        };
    let batcher = TelemetryBatcher::new(sink, shared_scheduler.clone(), config.batcher_config());

    let local = Arc::new(LocalCache::with_capacity_bytes(config.local_capacity_bytes));
    let distributed = Arc::new(MemoryKvStore::with_capacity_bytes(
        config.kv_prefix.clone(),
        config.distributed_capacity_bytes,
    ));
    let origin = Arc::new(FsOriginStore::new(config.origin_root.clone()));

    let resolver = Arc::new(CacheResolver::new(
        local,
        distributed,
        origin,
        shared_scheduler.clone(),
        ResolverConfig::default(),
    ));

    let state = HandlerState::new(
        resolver,
        Arc::new(config),
        batcher.clone(),
        shared_scheduler,
    );
    let app = create_router_with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let outcome = batcher.shutdown().await;
    tracing::info!(?outcome, "Final telemetry flush");

    if !scheduler.drain(SHUTDOWN_DRAIN_GRACE).await {
        tracing::warn!(
            pending = scheduler.pending(),
            "Background work still pending at shutdown, abandoning"
        );
    }

    tracing::info!("Cascade shutdown complete");
    Ok(())
}

fn run_health_check() -> i32 {
    let port = std::env::var("CASCADE_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let url = format!("http://127.0.0.1:{}/healthz", port);

    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return 1;
    };

    rt.block_on(async {
        let Ok(client) = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
        else {
            return 1;
        };

        match client.get(&url).send().await {
            Ok(res) if res.status().is_success() => 0,
            _ => 1,
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
