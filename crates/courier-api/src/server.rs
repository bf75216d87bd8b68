//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Handler execution

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use courier_core::{Clock, StatusStore, WorkExecutor};
use courier_delivery::WorkerPool;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::handlers;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Request lifecycle records.
    pub store: Arc<dyn StatusStore>,
    /// Background pipeline for `/async`.
    pub pool: Arc<WorkerPool>,
    /// Executor used inline by `/sync`.
    pub executor: Arc<dyn WorkExecutor>,
    /// Time source for record timestamps.
    pub clock: Arc<dyn Clock>,
    /// Records older than this are removed by cleanup.
    pub retention: Duration,
    /// Upper bound on a single HTTP request.
    pub request_timeout: Duration,
}

impl AppState {
    /// Builds state with the default timeout and retention window.
    pub fn new(
        store: Arc<dyn StatusStore>,
        pool: Arc<WorkerPool>,
        executor: Arc<dyn WorkExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            pool,
            executor,
            clock,
            retention: DEFAULT_RETENTION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the retention window used by `/admin/cleanup`.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Creates the router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use courier_api::{create_router, AppState};
/// use courier_core::{HashWorkExecutor, InMemoryStatusStore, RealClock};
/// use courier_delivery::{DeliveryConfig, WorkerPool};
///
/// let store = Arc::new(InMemoryStatusStore::new());
/// let executor = Arc::new(HashWorkExecutor);
/// let clock = Arc::new(RealClock);
/// let config = DeliveryConfig::default();
/// let pool = WorkerPool::new(config, store.clone(), executor.clone(), clock.clone())
///     .expect("valid pool configuration");
/// let app = create_router(AppState::new(store, Arc::new(pool), executor, clock));
/// // Serve the app...
/// ```
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout;

    let work_routes = Router::new()
        .route("/sync", post(handlers::process_sync))
        .route("/async", post(handlers::process_async));

    let request_routes = Router::new()
        .route("/requests", get(handlers::list_requests))
        .route("/requests/{request_id}", get(handlers::get_request));

    let ops_routes = Router::new()
        .route("/healthz", get(handlers::health_check))
        .route("/admin/cleanup", post(handlers::cleanup_requests));

    Router::new()
        .merge(work_routes)
        .merge(request_routes)
        .merge(ops_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Serves the API on `addr` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the listener
/// fails.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(addr = %actual_addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}
