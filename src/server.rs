use crate::config::Config;
use crate::error::GatewayError;
use crate::handlers::{generate_text, home, AppState, SharedState};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limit_config::GENERATE_ROUTE;
use crate::rate_limiter::RateLimiter;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router.
///
/// CORS sits outside rate limiting so 429s and errors carry the headers
/// and preflight requests are never counted.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route(GENERATE_ROUTE, post(generate_text))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware)),
        )
        .with_state(state)
}

pub struct Server {
    app: Router,
    addr: SocketAddr,
    rate_limiter: RateLimiter,
    cleanup_interval: Duration,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, GatewayError> {
        let state = AppState::from_config(&config).await?;
        let rate_limiter = state.rate_limiter.clone();

        Ok(Self {
            app: create_app(state),
            addr: config.bind_addr(),
            rate_limiter,
            cleanup_interval: config.rate_limit_cleanup_interval,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        tracing::info!("Gateway listening on {}", listener.local_addr()?);
        tracing::info!("Generation endpoint available at POST {}", GENERATE_ROUTE);

        if self.rate_limiter.backend_name() == "memory" {
            tokio::spawn(purge_expired_windows(self.rate_limiter.clone(), self.cleanup_interval));
        }

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn purge_expired_windows(rate_limiter: RateLimiter, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        match rate_limiter.purge_expired() {
            Ok(purged) => tracing::debug!(
                purged,
                remaining = rate_limiter.tracked_windows(),
                "Purged expired rate limit windows"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to purge rate limit windows"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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
