//! Kustomize mutating webhook

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use kustomize_mutating_webhook::{
    cli::{Cli, Command, TlsCommand},
    config::Config,
    metrics::MetricsExporter,
    server::Webhook,
    setup_tracing,
    tls::{CertGenerator, ServingCertParams},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup tracing
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    if let Err(e) = setup_tracing(level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Tls(TlsCommand::Init { dir, dns, days })) => run_tls_init(&dir, dns, days),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Write a self-signed serving certificate
fn run_tls_init(dir: &std::path::Path, dns: Vec<String>, days: u32) -> ExitCode {
    let cn = dns.first().cloned().unwrap_or_default();
    let params = ServingCertParams {
        cn: &cn,
        san_dns: dns,
        validity_days: days,
    };

    let result = CertGenerator::self_signed(&params)
        .and_then(|cert| CertGenerator::write_to_dir(&cert, dir));
    match result {
        Ok(()) => {
            println!("Wrote {0}/tls.crt and {0}/tls.key (CN={cn}, {days} days)", dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to generate certificate: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the webhook server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.server_address,
        cert_file = %config.cert_file.display(),
        config_dir = %config.config_dir.display(),
        "Starting kustomize mutating webhook"
    );

    let metrics = match MetricsExporter::install() {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to install metrics recorder: {e}");
            return ExitCode::FAILURE;
        }
    };

    let webhook = match Webhook::new(config, metrics) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to start webhook: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = webhook.run().await {
        error!("Webhook error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Webhook shutdown complete");
    ExitCode::SUCCESS
}
