//! Market Feed Server
//! Mission: Serve the crowd-sourced price feed with moderation and nightly cleanup

use anyhow::{Context, Result};
use market_feed_backend::{
    admin::AdminStore,
    api::{create_router, AppState, RouterConfig},
    auth::{AuthState, CaptchaStore, JwtHandler, UserStore},
    config::Config,
    feed::FeedStore,
    scheduler::CleanupScheduler,
    store::{KvStore, MemoryKvStore, RedisKvStore},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    init_tracing();

    info!("🚀 Market Feed Backend Starting ({})", config.app_env);
    config.warn_insecure_defaults();

    let store = connect_store(&config).await?;

    let feed = FeedStore::new(store.clone(), config.write_policy())
        .with_op_timeout(config.feed_op_timeout());
    info!("📈 Feed store ready ({:?})", feed.policy());

    let user_store = Arc::new(UserStore::new(store.clone()));
    let captcha = Arc::new(CaptchaStore::new(store.clone()));
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store.clone(), captcha, jwt_handler);
    let admin = Arc::new(AdminStore::new(store.clone()));

    match user_store
        .ensure_admin(&config.admin_username, &config.admin_password)
        .await
    {
        Ok(Some(user)) => info!("🔐 Admin account ready: {}", user.username),
        Ok(None) => info!("🔐 No ADMIN_USERNAME/ADMIN_PASSWORD set, skipping admin bootstrap"),
        Err(e) => error!("Failed to ensure admin account: {:#}", e),
    }

    // Nightly cleanup
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = CleanupScheduler::new(
        feed.clone(),
        admin.clone(),
        config.cleanup_schedule(),
        config.cleanup_policy(),
    )
    .spawn(shutdown_rx);

    let state = AppState::new(feed, auth_state, admin);
    let (app, limiter) = create_router(
        state,
        RouterConfig {
            rate_limit: config.rate_limit(),
            request_timeout: config.request_timeout(),
        },
    );

    // Forget idle rate-limit clients
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            limiter.cleanup();
        }
    });

    let port = config.port()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("🛑 Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = cleanup.await {
        warn!("Cleanup scheduler task ended abnormally: {}", e);
    }

    Ok(())
}

async fn connect_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    if config.memory_store {
        warn!("💾 Using in-memory store, data will not survive a restart");
        return Ok(Arc::new(MemoryKvStore::new()));
    }

    let url = config.redis_url();
    let store = RedisKvStore::connect(&url, REDIS_CONNECT_TIMEOUT)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_addr))?;
    info!("💾 Redis connected at {}", config.redis_addr);
    Ok(Arc::new(store))
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_feed_backend=debug,market_feed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
