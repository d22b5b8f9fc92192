//! Configuration management

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variables read on top of the optional config file.
///
/// These keep the names used by existing deployment manifests, unprefixed.
const ENV_KEYS: &[&str] = &[
    "SERVER_ADDRESS",
    "CERT_FILE",
    "KEY_FILE",
    "CONFIG_DIR",
    "LOG_LEVEL",
    "RATE_LIMIT",
    "SHUTDOWN_TIMEOUT",
    "RELOAD_SETTLE_DELAY",
    "WATCH_CONFIG_DIR",
];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address, `host:port` or `:port`
    pub server_address: String,
    /// PEM-encoded serving certificate
    pub cert_file: PathBuf,
    /// PEM-encoded private key for `cert_file`
    pub key_file: PathBuf,
    /// Directory holding one file per substitution variable
    pub config_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Mutation requests per second; also the burst capacity
    pub rate_limit: u32,
    /// Grace period for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Wait between a removal event and re-reading watched files
    #[serde(with = "humantime_serde")]
    pub reload_settle_delay: Duration,
    /// Reload the config snapshot when the config directory is swapped
    pub watch_config_dir: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: ":8080".to_string(),
            cert_file: PathBuf::from("/etc/webhook/certs/tls.crt"),
            key_file: PathBuf::from("/etc/webhook/certs/tls.key"),
            config_dir: PathBuf::from("/etc/config"),
            log_level: "info".to_string(),
            rate_limit: 100,
            shutdown_timeout: Duration::from_secs(30),
            reload_settle_delay: Duration::from_millis(100),
            watch_config_dir: true,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::figment(path)?
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        Ok(figment.merge(Env::raw().only(ENV_KEYS)))
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.server_address.trim().is_empty() {
            return Err(Error::Config("server address is required".into()));
        }
        if self.cert_file.as_os_str().is_empty() {
            return Err(Error::Config("certificate file path is required".into()));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(Error::Config("key file path is required".into()));
        }
        if self.config_dir.as_os_str().is_empty() {
            return Err(Error::Config("config directory is required".into()));
        }
        if self.rate_limit == 0 {
            return Err(Error::Config("rate limit must be greater than 0".into()));
        }
        self.socket_addr().map(|_| ())
    }

    /// Parse `server_address`; a bare `:port` binds all IPv4 interfaces
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = self.server_address.trim();
        if let Some(port) = addr.strip_prefix(':') {
            let port: u16 = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid port in '{addr}': {e}")))?;
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        addr.parse()
            .map_err(|e| Error::Config(format!("Invalid server address '{addr}': {e}")))
    }

    /// Rate limit as the non-zero quota the admission gate needs
    pub fn rate(&self) -> Result<NonZeroU32> {
        NonZeroU32::new(self.rate_limit)
            .ok_or_else(|| Error::Config("rate limit must be greater than 0".into()))
    }

    /// Directory the certificate files live in (the one to watch)
    #[must_use]
    pub fn cert_dir(&self) -> PathBuf {
        self.cert_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" must be checked before the bare "s" and "m" suffixes
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_match_deployment_manifests() {
        let config = Config::default();
        assert_eq!(config.server_address, ":8080");
        assert_eq!(config.cert_file, PathBuf::from("/etc/webhook/certs/tls.crt"));
        assert_eq!(config.key_file, PathBuf::from("/etc/webhook/certs/tls.key"));
        assert_eq!(config.config_dir, PathBuf::from("/etc/config"));
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.reload_settle_delay, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bare_port_binds_all_interfaces() {
        let config = Config {
            server_address: ":8443".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.socket_addr().unwrap(),
            "0.0.0.0:8443".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let config = Config {
            rate_limit: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate limit"));
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let config = Config {
            cert_file: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            server_address: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_garbage_address() {
        let config = Config {
            server_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cert_dir_is_parent_of_cert_file() {
        let config = Config {
            cert_file: PathBuf::from("/run/certs/tls.crt"),
            ..Default::default()
        };
        assert_eq!(config.cert_dir(), PathBuf::from("/run/certs"));

        let config = Config {
            cert_file: PathBuf::from("tls.crt"),
            ..Default::default()
        };
        assert_eq!(config.cert_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("SERVER_ADDRESS", "127.0.0.1:9443");
            jail.set_env("RATE_LIMIT", "7");
            jail.set_env("CONFIG_DIR", "/srv/vars");
            jail.set_env("RELOAD_SETTLE_DELAY", "250ms");

            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.server_address, "127.0.0.1:9443");
            assert_eq!(config.rate_limit, 7);
            assert_eq!(config.config_dir, PathBuf::from("/srv/vars"));
            assert_eq!(config.reload_settle_delay, Duration::from_millis(250));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "webhook.yaml",
                r#"
server_address: "127.0.0.1:9000"
rate_limit: 20
shutdown_timeout: "5s"
"#,
            )?;
            jail.set_env("RATE_LIMIT", "40");

            let config =
                Config::load(Some(Path::new("webhook.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.server_address, "127.0.0.1:9000");
            assert_eq!(config.rate_limit, 40);
            assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/webhook.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_humantime_parses_units() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }

        let parse = |s: &str| -> Duration {
            serde_json::from_str::<Wrapper>(&format!(r#"{{"d":{s}}}"#))
                .unwrap()
                .d
        };
        assert_eq!(parse(r#""100ms""#), Duration::from_millis(100));
        assert_eq!(parse(r#""30s""#), Duration::from_secs(30));
        assert_eq!(parse(r#""5m""#), Duration::from_secs(300));
        assert_eq!(parse(r#""12""#), Duration::from_secs(12));
        assert_eq!(parse("3"), Duration::from_secs(3));
    }
}
