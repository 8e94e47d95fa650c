use std::env;
use std::sync::Arc;
use std::time::Duration;

use portico_cache::{
    DurableStore, HybridCache, InvalidationListener, InvalidationPublisher, MemoryStore,
    RedisStore,
};
use portico_server::{AppConfig, AppState, build_app, init_tracing};

#[tokio::main]
async fn main() {
    // .env is optional; only complain about real failures.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    let config_path =
        env::var("PORTICO_CONFIG").unwrap_or_else(|_| "portico.toml".to_string());
    let config = match AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    init_tracing(&config.logging.level);
    tracing::info!(path = %config_path, "configuration loaded");

    let cache = build_cache(&config);
    cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));

    let state = AppState::admin_only(Arc::clone(&cache));
    let app = build_app(state);

    let addr = match config.listen_addr() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %addr, "admin surface listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Assemble the hybrid cache from configuration: Redis durable tier with
/// cross-instance invalidation when enabled, in-process durable tier
/// otherwise. A Redis setup failure degrades to single-instance mode rather
/// than aborting startup.
fn build_cache(config: &AppConfig) -> Arc<HybridCache> {
    if !config.redis.enabled {
        tracing::info!("Redis disabled, using in-process durable tier");
        return Arc::new(HybridCache::new(Some(MemoryStore::shared())));
    }

    let mut pool_config = deadpool_redis::Config::from_url(&config.redis.url);
    pool_config.pool = Some(deadpool_redis::PoolConfig::new(config.redis.pool_size));

    match pool_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => {
            let store: Arc<dyn DurableStore> = Arc::new(RedisStore::new(pool.clone()));
            let cache = Arc::new(
                HybridCache::new(Some(store))
                    .with_publisher(InvalidationPublisher::new(pool)),
            );
            InvalidationListener::new(config.redis.url.clone(), &cache).start();
            tracing::info!(url = %config.redis.url, "Redis durable tier enabled");
            cache
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis pool setup failed, degrading to in-process durable tier");
            Arc::new(HybridCache::new(Some(MemoryStore::shared())))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
