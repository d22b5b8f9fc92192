//! Serving certificate: PEM loading, rustls wiring, and live rotation

mod cert_manager;
mod credential;

pub use cert_manager::{
    CertGenerator, GeneratedCert, ServingCertParams, build_server_config, crypto_provider,
    load_certs, load_private_key,
};
pub use credential::{Credential, CredentialStore};
