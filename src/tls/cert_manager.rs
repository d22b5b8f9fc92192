//! Certificate management: PEM loading, rustls config building, and
//! self-signed certificate generation for the `tls init` command.
//!
//! All certificate and key files are expected in **PEM format**, which is what
//! cert-manager and `kubectl create secret tls` produce.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, date_time_ymd};
use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ResolvesServerCert;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` that asks `resolver` for the certificate on
/// every handshake.
///
/// No client certificate is requested: the API server authenticates the
/// webhook, not the other way round.
pub fn build_server_config(resolver: Arc<dyn ResolvesServerCert>) -> Result<ServerConfig> {
    let mut tls_cfg = ServerConfig::builder_with_provider(Arc::new(crypto_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS protocol setup failed: {e}")))?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(tls_cfg)
}

/// The crypto provider used for both handshakes and key loading
#[must_use]
pub fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::CredentialLoad(format!(
                "Failed to parse certs from '{}': {e}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(Error::CredentialLoad(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#1 RSA, PKCS#8, and SEC1 EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem_data).map_err(|e| {
        Error::CredentialLoad(format!(
            "No usable private key in '{}': {e}",
            path.display()
        ))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation (CLI helper)
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for a self-signed serving certificate.
#[derive(Debug)]
pub struct ServingCertParams<'a> {
    /// Common Name (usually the service DNS name).
    pub cn: &'a str,
    /// DNS Subject Alternative Names.
    pub san_dns: Vec<String>,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Certificate generator backed by `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed serving certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if a SAN is invalid, key generation fails, or the
    /// certificate cannot be serialised.
    pub fn self_signed(params: &ServingCertParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate key: {e}")))?;

        let mut cert_params = CertificateParams::new(params.san_dns.clone())
            .map_err(|e| Error::Config(format!("Invalid DNS SAN: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        cert_params.distinguished_name = dn;
        cert_params.not_after = validity_to_date(params.validity_days)?;

        let cert = cert_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("Certificate generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Write a [`GeneratedCert`] to disk as `tls.crt` and `tls.key` under `dir`,
    /// the file names a Kubernetes TLS secret mounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

        fs::write(dir.join("tls.crt"), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        fs::write(dir.join("tls.key"), &cert.key_pem)
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| Error::CredentialLoad(format!("Cannot read '{}': {e}", path.display())))
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("System time error: {e}")))?
        .as_secs();

    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(
        i64::try_from(future_secs).unwrap_or(i64::MAX),
    )
    .map_err(|e| Error::Config(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
