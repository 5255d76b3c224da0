use crate::config::Config;
use crate::error::Result;
use crate::handlers::{health_check, hello, AppState};
use crate::health::HealthChecker;
use crate::middleware::logging_middleware;
use crate::store::{CounterStore, RedisStore};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the demo application: `/hello` is rate limited, `/health` is not.
pub fn create_app(store: Arc<dyn CounterStore>, config: &Config) -> Result<Router> {
    let rate_limit = config.rate_limit().shared_store(store.clone()).build()?;
    let trusted = config.trusted();

    let state = AppState {
        health: Arc::new(HealthChecker::new(store)),
    };

    let limited = Router::new()
        .route("/hello", get(hello))
        .route_layer(rate_limit);

    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .merge(limited)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(trusted, logging_middleware)),
        );

    Ok(app)
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let store = RedisStore::connect(&config.redis_url).await?;
        let app = create_app(Arc::new(store), &config)?;

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Rate limited server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        // Connection addresses feed the client IP resolver.
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
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
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
