//! Kustomize mutating webhook
//!
//! Kubernetes mutating admission webhook that injects the variables of a
//! mounted ConfigMap or Secret into every Flux `Kustomization`'s
//! `spec.postBuild.substitute`.
//!
//! # Features
//!
//! - **Mutation**: JSON Patch built from the current config snapshot, keys in sorted order
//! - **Hot reload**: serving certificate (and optionally the config) reloaded when
//!   Kubernetes swaps the mounted volume
//! - **Admission gate**: token-bucket rate limit on `/mutate`
//! - **Production Ready**: health and readiness probes, Prometheus metrics, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod mutation;
pub mod server;
pub mod snapshot;
pub mod tls;
pub mod watch;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
