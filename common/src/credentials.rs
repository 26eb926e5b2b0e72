use std::{fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    ClientConfig as RustlsClientConfig, RootCertStore, ServerConfig as RustlsServerConfig,
};
use rustls_pemfile::{certs, crls, private_key};

use crate::{config::CredentialPaths, error::CredentialLoadError, identity::RequireCommonName};

/// Credentials for one role: its own certificate chain and private key plus
/// the CA set used to validate the peer.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug)]
pub struct ConnectionConfig {
    cert_chain:  Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    roots:       Arc<RootCertStore>,
}

impl ConnectionConfig {
    /// Load the three PEM inputs from disk
    pub fn load(paths: &CredentialPaths) -> Result<Self, CredentialLoadError> {
        tracing::debug!("  - Cert: {:?}", paths.cert_path);
        tracing::debug!("  - Key: {:?}", paths.key_path);
        tracing::debug!("  - CA: {:?}", paths.ca_path);

        let cert_pem = read_pem("certificate", &paths.cert_path)?;
        let key_pem = read_pem("private key", &paths.key_path)?;
        let ca_pem = read_pem("CA bundle", &paths.ca_path)?;

        Self::from_pem(&cert_pem, &key_pem, &ca_pem)
    }

    /// Build credentials from in-memory PEM blobs
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        ca_pem: &[u8],
    ) -> Result<Self, CredentialLoadError> {
        let cert_chain = parse_certs("certificate", cert_pem)?;

        let private_key = private_key(&mut BufReader::new(key_pem))
            .map_err(|source| CredentialLoadError::Parse {
                what: "private key",
                source,
            })?
            .ok_or(CredentialLoadError::NoPrivateKey)?;

        let mut root_store = RootCertStore::empty();
        let (added, ignored) =
            root_store.add_parsable_certificates(parse_certs("CA bundle", ca_pem)?);
        if ignored > 0 {
            tracing::warn!(added, ignored, "Skipped unparsable CA certificates");
        }

        if root_store.is_empty() {
            return Err(CredentialLoadError::EmptyTrustStore);
        }

        Ok(Self {
            cert_chain,
            private_key,
            roots: Arc::new(root_store),
        })
    }

    /// Own certificate chain, end-entity first
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Trusted CA set
    pub fn roots(&self) -> &Arc<RootCertStore> {
        &self.roots
    }

    /// rustls server configuration that requires and verifies a client
    /// certificate against the trusted CA set, optionally checking `crls`.
    pub fn server_tls_config(
        &self,
        crls: Vec<CertificateRevocationListDer<'static>>,
    ) -> Result<Arc<RustlsServerConfig>, CredentialLoadError> {
        install_crypto_provider();

        let mut builder = WebPkiClientVerifier::builder(self.roots.clone());
        if !crls.is_empty() {
            builder = builder.with_crls(crls);
        }
        let client_verifier = Arc::new(RequireCommonName::new(builder.build()?));

        let config = RustlsServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())?;

        Ok(Arc::new(config))
    }

    /// rustls client configuration presenting our certificate and verifying
    /// the server against the trusted CA set
    pub fn client_tls_config(&self) -> Result<Arc<RustlsClientConfig>, CredentialLoadError> {
        install_crypto_provider();

        let config = RustlsClientConfig::builder()
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.cert_chain.clone(), self.private_key.clone_key())?;

        Ok(Arc::new(config))
    }
}

/// Load certificate revocation lists from a PEM file
pub fn load_crls(
    path: &Path,
) -> Result<Vec<CertificateRevocationListDer<'static>>, CredentialLoadError> {
    let pem = read_pem("CRL", path)?;
    crls(&mut BufReader::new(&*pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialLoadError::Parse { what: "CRL", source })
}

/// Install the process-wide rustls crypto provider if none is set yet
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>, CredentialLoadError> {
    fs::read(path).map_err(|source| CredentialLoadError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(
    what: &'static str,
    pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, CredentialLoadError> {
    let parsed = certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialLoadError::Parse { what, source })?;

    if parsed.is_empty() {
        return Err(CredentialLoadError::NoCertificates { what });
    }
    Ok(parsed)
}
