//! Phoenix Guard entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use phoenix_guard::config::{Config, StoreKind};
use phoenix_guard::{AppState, ServiceState};
use phoenix_guard_service::store::{CounterStore, RedisStore};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let service_config = config.service_config();
    let service = match config.store {
        StoreKind::Memory => ServiceState::with_memory_store(&service_config),
        StoreKind::Redis => {
            let store = RedisStore::connect(&config.redis_url)
                .await
                .expect("failed to connect to redis");
            ServiceState::new(&service_config, Some(Arc::new(store) as Arc<dyn CounterStore>))
        }
        StoreKind::None => {
            tracing::warn!("no counter store configured, rate limiting is disabled");
            ServiceState::new(&service_config, None)
        }
    };

    let state = AppState::new(service, config.cors_origins.clone());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = state.store_backend(),
        fail_mode = %service_config.fail_mode,
        auto_block = service_config.auto_block,
        admin = service_config.admin_token.is_some(),
        "Phoenix Guard starting",
    );

    let app = phoenix_guard::router(state.clone());

    let addr = SocketAddr::new(config.host.parse().expect("invalid host"), config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    // Spawn memory store cleanup task
    if config.store == StoreKind::Memory {
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                let removed = cleanup_state.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Cleaned up expired counters");
                }
            }
        });
    }

    tracing::info!(%addr, "Phoenix Guard ready");

    phoenix_guard::serve(listener, app, shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("Phoenix Guard shut down");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install signal handler");
    tracing::info!("Shutdown signal received");
}
