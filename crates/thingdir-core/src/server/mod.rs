//! Directory HTTP server
//!
//! Serves the directory over HTTP with axum:
//!
//! - `GET /things?queryparams=<expr>&offset=<n>&limit=<n>`: list or query
//! - `GET|POST|PUT|PATCH|DELETE /things/{id}`: single document
//!
//! TLS is terminated in front of the server. Each request is authenticated
//! and authorized through the injected hooks before it reaches the store.
//!
//! ## Lifecycle
//!
//! `start` opens the store, binds the listener and publishes the discovery
//! advert. `stop` withdraws the advert, drains the listener and closes the
//! store, writing pending changes.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth::{Authenticator, Authorizer};
use crate::config::Config;
use crate::discovery::{DiscoveryPublisher, ServiceAdvert};
use crate::error::DirError;
use crate::protocol::{ROUTE_THINGS, ROUTE_THING_ID};
use crate::store::DirStore;

/// Errors starting or stopping the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory store error: {0}")]
    Store(#[from] DirError),
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DirStore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub authorizer: Arc<dyn Authorizer>,
    /// Accept the client identity header as a verified certificate subject
    pub trust_identity_header: bool,
}

/// Build the directory routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(ROUTE_THINGS, get(handlers::list_things))
        .route(
            ROUTE_THING_ID,
            get(handlers::get_thing)
                .post(handlers::create_thing)
                .put(handlers::replace_thing)
                .patch(handlers::patch_thing)
                .delete(handlers::delete_thing),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The directory service
pub struct DirServer {
    config: Config,
    state: AppState,
    discovery: Option<Arc<dyn DiscoveryPublisher>>,
    running: Option<Running>,
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    serve_task: JoinHandle<()>,
    flush_task: Option<JoinHandle<()>>,
    advert: Option<ServiceAdvert>,
}

impl DirServer {
    pub fn new(
        config: Config,
        store: Arc<DirStore>,
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let trust_identity_header = config.trust_client_identity_header;
        Self {
            config,
            state: AppState {
                store,
                authenticator,
                authorizer,
                trust_identity_header,
            },
            discovery: None,
            running: None,
        }
    }

    /// Publish the endpoint through `publisher` while running
    pub fn with_discovery(mut self, publisher: Arc<dyn DiscoveryPublisher>) -> Self {
        self.discovery = Some(publisher);
        self
    }

    pub fn store(&self) -> &Arc<DirStore> {
        &self.state.store
    }

    /// Address the server is listening on, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open the store and start serving
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 is used.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.addr));
        }

        self.state.store.open()?;

        let address = self.config.listen_address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.close_store();
                return Err(ServerError::Bind { address, source });
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.close_store();
                return Err(ServerError::Bind { address, source });
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.state.clone());
        let serve_task = tokio::spawn(async move {
            let signal = async {
                shutdown_rx.await.ok();
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!("Directory server error: {}", e);
            }
        });

        let flush_task = self
            .config
            .flush_interval_secs
            .filter(|secs| *secs > 0)
            .map(|secs| spawn_flusher(Arc::clone(&self.state.store), secs));

        let advert = self.publish(addr);

        info!("Directory server listening on {}", addr);
        self.running = Some(Running {
            addr,
            shutdown,
            serve_task,
            flush_task,
            advert,
        });
        Ok(addr)
    }

    /// Stop serving and close the store
    ///
    /// Stopping a server that isn't running does nothing.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        if let (Some(publisher), Some(advert)) = (&self.discovery, &running.advert) {
            if let Err(e) = publisher.withdraw(advert) {
                warn!("Failed to withdraw discovery advert: {}", e);
            }
        }

        if let Some(flush_task) = running.flush_task {
            flush_task.abort();
        }

        let _ = running.shutdown.send(());
        if let Err(e) = running.serve_task.await {
            warn!("Directory server task ended abnormally: {}", e);
        }

        self.state.store.close()?;
        info!("Directory server on {} stopped", running.addr);
        Ok(())
    }

    fn publish(&self, addr: SocketAddr) -> Option<ServiceAdvert> {
        let publisher = self.discovery.as_ref()?;
        let advert = ServiceAdvert::new(
            self.config.instance_id.clone(),
            self.config.discovery.service_type.clone(),
            addr,
        );
        match publisher.publish(&advert) {
            Ok(()) => Some(advert),
            Err(e) => {
                warn!("Service discovery unavailable: {}", e);
                None
            }
        }
    }

    fn close_store(&self) {
        if let Err(e) = self.state.store.close() {
            warn!("Failed to close store after start failure: {}", e);
        }
    }
}

/// Write the store to disk every `secs` seconds
fn spawn_flusher(store: Arc<DirStore>, secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.flush()).await {
                Ok(Ok(())) => debug!("Periodic flush done"),
                Ok(Err(e)) => warn!("Periodic flush failed: {}", e),
                Err(e) => warn!("Periodic flush task failed: {}", e),
            }
        }
    })
}
