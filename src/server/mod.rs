//! HTTPS server: wiring, serving, and shutdown

mod router;

pub use router::{AppState, create_router};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gate::AdmissionGate;
use crate::metrics::{self, MetricsExporter};
use crate::snapshot::{SnapshotProvider, SnapshotStore};
use crate::tls::{CredentialStore, build_server_config};
use crate::watch::{DirectoryWatch, Reload};
use crate::{Error, Result};

/// The running webhook: TLS credentials, config snapshot, and HTTP state
pub struct Webhook {
    config: Config,
    credentials: Arc<CredentialStore>,
    snapshot: Arc<SnapshotStore>,
    state: Arc<AppState>,
    config_watch: Option<DirectoryWatch>,
}

impl Webhook {
    /// Load the serving certificate and the config snapshot.
    ///
    /// A certificate that cannot be loaded is fatal. A missing or empty config
    /// directory is not: the webhook starts not-ready.
    pub fn new(config: Config, metrics: MetricsExporter) -> Result<Self> {
        config.validate()?;

        let credentials = Arc::new(CredentialStore::load(&config.cert_file, &config.key_file)?);

        let snapshot = Arc::new(SnapshotStore::new(&config.config_dir));
        if let Err(e) = snapshot.reload() {
            warn!(
                directory = %config.config_dir.display(),
                error = %e,
                "Config not loaded, starting not ready"
            );
        }

        let gate = Arc::new(AdmissionGate::new(config.rate()?));
        let provider: Arc<dyn SnapshotProvider> = Arc::clone(&snapshot) as _;
        let state = Arc::new(AppState::new(provider, gate, metrics));

        Ok(Self {
            config,
            credentials,
            snapshot,
            state,
            config_watch: None,
        })
    }

    /// Shared HTTP state
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serving certificate store
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.serve(shutdown_signal(), None).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// The bound address is sent on `bound` once the listener is up, which
    /// lets callers bind port 0.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
        bound: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<()> {
        self.start_watches();

        let addr = self.config.socket_addr()?;
        let tls = build_server_config(Arc::clone(&self.credentials) as _)?;
        let app = create_router(Arc::clone(&self.state));

        let handle = Handle::new();
        let grace = self.config.shutdown_timeout;
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!(grace = ?grace, "Shutting down, draining in-flight requests");
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        if let Some(bound) = bound {
            let listening = handle.clone();
            tokio::spawn(async move {
                if let Some(addr) = listening.listening().await {
                    let _ = bound.send(addr);
                }
            });
        }

        info!(
            address = %addr,
            config_dir = %self.config.config_dir.display(),
            rate_limit = self.config.rate_limit,
            "Starting mutating webhook"
        );

        let served = axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(tls)))
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::Internal(format!("Server error: {e}")));

        self.stop().await;
        served
    }

    /// Start the reload watches. A watch that cannot start is logged and
    /// skipped; serving continues with what was loaded at startup.
    fn start_watches(&mut self) {
        let settle = self.config.reload_settle_delay;
        let cert_dir = self.config.cert_dir();
        if let Err(e) = self.credentials.watch(&cert_dir, settle) {
            error!(
                directory = %cert_dir.display(),
                error = %e,
                "Cannot watch certificate directory, rotation disabled"
            );
            metrics::record_error(e.metric_label());
        }

        if self.config.watch_config_dir {
            match DirectoryWatch::start(
                &self.config.config_dir,
                Arc::clone(&self.snapshot) as Arc<dyn Reload>,
                settle,
            ) {
                Ok(watch) => self.config_watch = Some(watch),
                Err(e) => {
                    error!(
                        directory = %self.config.config_dir.display(),
                        error = %e,
                        "Cannot watch config directory"
                    );
                    metrics::record_error(e.metric_label());
                }
            }
        }
    }

    async fn stop(&mut self) {
        self.credentials.stop();
        if let Some(watch) = self.config_watch.take() {
            watch.shutdown().await;
        }
        info!("Watches stopped");
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
