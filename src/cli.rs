//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutating admission webhook for Flux Kustomization postBuild substitutions
#[derive(Parser, Debug)]
#[command(name = "kustomize-mutating-webhook")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "WEBHOOK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides `LOG_LEVEL`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the webhook server (default)
    Serve,

    /// Serving certificate helpers
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// TLS subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Write a self-signed `tls.crt`/`tls.key` pair for local development
    Init {
        /// Output directory
        #[arg(short, long, default_value = "certs")]
        dir: PathBuf,

        /// DNS names for the certificate (first one is the CN)
        #[arg(long = "dns", required = true)]
        dns: Vec<String>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["kustomize-mutating-webhook"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn tls_init_collects_dns_names() {
        let cli = Cli::try_parse_from([
            "kustomize-mutating-webhook",
            "tls",
            "init",
            "--dns",
            "webhook.flux-system.svc",
            "--dns",
            "webhook.flux-system.svc.cluster.local",
            "--days",
            "30",
        ])
        .unwrap();

        let Some(Command::Tls(TlsCommand::Init { dir, dns, days })) = cli.command else {
            panic!("expected tls init");
        };
        assert_eq!(dir, PathBuf::from("certs"));
        assert_eq!(dns.len(), 2);
        assert_eq!(days, 30);
    }

    #[test]
    fn tls_init_requires_dns() {
        assert!(Cli::try_parse_from(["kustomize-mutating-webhook", "tls", "init"]).is_err());
    }
}
