//! Live serving certificate with rotation on file replacement

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{info, warn};

use super::cert_manager::{crypto_provider, load_certs, load_private_key};
use crate::watch::{DirectoryWatch, Reload};
use crate::{Error, Result};

/// One loaded certificate chain and its signing key
#[derive(Debug)]
pub struct Credential {
    version: u64,
    certified: Arc<CertifiedKey>,
    loaded_at: DateTime<Utc>,
    not_after: Option<DateTime<Utc>>,
}

impl Credential {
    /// Load generation, starting at 1
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Chain and key as handed to rustls
    #[must_use]
    pub fn certified_key(&self) -> &Arc<CertifiedKey> {
        &self.certified
    }

    /// When this generation was read from disk
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Expiry of the leaf certificate, if it could be read
    #[must_use]
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }
}

/// Holds the current [`Credential`] and swaps it when the files are replaced.
///
/// Handshakes resolve through [`ResolvesServerCert`], so a rotation applies to
/// new connections only; established ones keep the certificate they started
/// with.
pub struct CredentialStore {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: RwLock<Arc<Credential>>,
    // Serialises reloads so versions are handed out in publish order
    reload_lock: Mutex<()>,
    watch: Mutex<Option<DirectoryWatch>>,
}

impl CredentialStore {
    /// Load the initial credential; the store is unusable without one.
    ///
    /// # Errors
    ///
    /// [`Error::CredentialLoad`] if either file is missing or unreadable, holds
    /// no certificate or key, or the key does not belong to the certificate.
    pub fn load(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let credential = read_credential(&cert_path, &key_path, 1)?;
        log_loaded(&credential, &cert_path);

        Ok(Self {
            cert_path,
            key_path,
            current: RwLock::new(Arc::new(credential)),
            reload_lock: Mutex::new(()),
            watch: Mutex::new(None),
        })
    }

    /// The credential new handshakes will use
    #[must_use]
    pub fn current(&self) -> Arc<Credential> {
        Arc::clone(&self.current.read())
    }

    /// Re-read both files and publish them as the next version.
    ///
    /// On error the current credential is left in place.
    pub fn reload(&self) -> Result<Arc<Credential>> {
        let _guard = self.reload_lock.lock();
        let next = self.current.read().version + 1;
        let credential = Arc::new(read_credential(&self.cert_path, &self.key_path, next)?);
        *self.current.write() = Arc::clone(&credential);
        log_loaded(&credential, &self.cert_path);
        Ok(credential)
    }

    /// Start reloading whenever an entry in `dir` is removed.
    ///
    /// Replaces any watch already running. Must be called from within a tokio
    /// runtime.
    pub fn watch(self: &Arc<Self>, dir: &Path, settle: Duration) -> Result<()> {
        let watch = DirectoryWatch::start(dir, Arc::clone(self) as Arc<dyn Reload>, settle)?;
        if let Some(previous) = self.watch.lock().replace(watch) {
            previous.stop();
        }
        Ok(())
    }

    /// `true` while a watch loop is running
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .is_some_and(DirectoryWatch::is_running)
    }

    /// Stop watching. Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(watch) = self.watch.lock().take() {
            watch.stop();
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("version", &self.current.read().version)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for CredentialStore {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.current.read().certified))
    }
}

impl Reload for CredentialStore {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn reload(&self) -> Result<()> {
        CredentialStore::reload(self).map(|_| ())
    }
}

fn read_credential(cert_path: &Path, key_path: &Path, version: u64) -> Result<Credential> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let not_after = certs.first().and_then(|leaf| leaf_not_after(leaf.as_ref()));

    let certified = CertifiedKey::from_der(certs, key, &crypto_provider()).map_err(|e| {
        Error::CredentialLoad(format!(
            "Key '{}' does not match certificate '{}': {e}",
            key_path.display(),
            cert_path.display()
        ))
    })?;

    Ok(Credential {
        version,
        certified: Arc::new(certified),
        loaded_at: Utc::now(),
        not_after,
    })
}

fn leaf_not_after(der: &[u8]) -> Option<DateTime<Utc>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
}

fn log_loaded(credential: &Credential, cert_path: &Path) {
    info!(
        version = credential.version,
        cert = %cert_path.display(),
        not_after = ?credential.not_after,
        "Serving certificate loaded"
    );
    if credential.not_after.is_some_and(|t| t <= credential.loaded_at) {
        warn!(
            version = credential.version,
            not_after = ?credential.not_after,
            "Serving certificate has already expired"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use super::*;
    use crate::tls::{CertGenerator, GeneratedCert, ServingCertParams};

    fn generate(cn: &str) -> GeneratedCert {
        CertGenerator::self_signed(&ServingCertParams {
            cn,
            san_dns: vec![cn.to_string()],
            validity_days: 7,
        })
        .unwrap()
    }

    fn write(dir: &Path, cert: &GeneratedCert) {
        CertGenerator::write_to_dir(cert, dir).unwrap();
    }

    fn leaf_der(pem: &str) -> Vec<u8> {
        use rustls::pki_types::CertificateDer;
        use rustls::pki_types::pem::PemObject;
        CertificateDer::from_pem_slice(pem.as_bytes()).unwrap().to_vec()
    }

    fn served_der(store: &CredentialStore) -> Vec<u8> {
        store.current().certified_key().cert[0].to_vec()
    }

    #[test]
    fn load_reads_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let cert = generate("webhook.local");
        write(dir.path(), &cert);

        let store =
            CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key")).unwrap();
        let current = store.current();
        assert_eq!(current.version(), 1);
        assert!(current.not_after().is_some_and(|t| t > current.loaded_at()));
        assert_eq!(served_der(&store), leaf_der(&cert.cert_pem));
    }

    #[test]
    fn load_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key"))
            .unwrap_err();
        assert!(matches!(err, Error::CredentialLoad(_)));
    }

    #[test]
    fn load_rejects_mismatched_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = generate("a.local");
        let b = generate("b.local");
        fs::write(dir.path().join("tls.crt"), &a.cert_pem).unwrap();
        fs::write(dir.path().join("tls.key"), &b.key_pem).unwrap();

        let err = CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key"))
            .unwrap_err();
        assert!(matches!(err, Error::CredentialLoad(_)));
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn reload_bumps_version_and_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &generate("a.local"));
        let store =
            CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key")).unwrap();

        let b = generate("b.local");
        write(dir.path(), &b);
        assert_eq!(store.reload().unwrap().version(), 2);
        assert_eq!(served_der(&store), leaf_der(&b.cert_pem));

        fs::write(dir.path().join("tls.key"), "garbage").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().version(), 2);
        assert_eq!(served_der(&store), leaf_der(&b.cert_pem));
    }

    #[test]
    fn readers_never_see_a_mismatched_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = [generate("a.local"), generate("b.local")];
        write(dir.path(), &pairs[0]);
        let store = Arc::new(
            CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key")).unwrap(),
        );
        let known = [leaf_der(&pairs[0].cert_pem), leaf_der(&pairs[1].cert_pem)];

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let known = known.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..500 {
                        let current = store.current();
                        assert!(current.version() >= last);
                        last = current.version();
                        assert!(current.certified_key().keys_match().is_ok());
                        assert!(known.contains(&current.certified_key().cert[0].to_vec()));
                    }
                })
            })
            .collect();

        // Files are rewritten non-atomically; reloads that catch a torn pair fail
        for i in 0..40 {
            write(dir.path(), &pairs[i % 2]);
            let _ = store.reload();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn resolver_hands_out_current_key() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &generate("a.local"));
        let store =
            CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key")).unwrap();
        let resolver: Arc<dyn ResolvesServerCert> = Arc::new(store);
        assert!(crate::tls::build_server_config(resolver).is_ok());
    }

    #[tokio::test]
    async fn removal_in_cert_dir_rotates_credential() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &generate("a.local"));
        let marker = dir.path().join("..2026_10_16_old");
        fs::write(&marker, "").unwrap();

        let store = Arc::new(
            CredentialStore::load(dir.path().join("tls.crt"), dir.path().join("tls.key")).unwrap(),
        );
        store.watch(dir.path(), Duration::from_millis(20)).unwrap();
        assert!(store.is_watching());

        let b = generate("b.local");
        write(dir.path(), &b);
        assert_eq!(store.current().version(), 1, "writes alone must not reload");

        fs::remove_file(&marker).unwrap();
        for _ in 0..100 {
            if store.current().version() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.current().version(), 2);
        assert_eq!(served_der(&store), leaf_der(&b.cert_pem));

        store.stop();
        store.stop();
    }
}
