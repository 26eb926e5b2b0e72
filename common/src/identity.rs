//! Peer identity extraction.
//!
//! After rustls has validated the peer's chain, the end-entity certificate is
//! parsed with `x509-parser` and its subject Common Name becomes the identity
//! recorded in access logs. [`RequireCommonName`] applies the same rule during
//! the handshake so a peer without a usable CN is refused with an alert.

use std::sync::Arc;

use rustls::{
    client::danger::HandshakeSignatureValid,
    pki_types::{CertificateDer, UnixTime},
    server::danger::{ClientCertVerified, ClientCertVerifier},
    CertificateError, DigitallySignedStruct, DistinguishedName, OtherError, SignatureScheme,
};
use sha2::{Digest, Sha256};
use x509_parser::{certificate::X509Certificate, prelude::FromDer};

use crate::error::HandshakeError;

/// Identity of an authenticated peer, one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    /// Subject CN of the peer's end-entity certificate
    pub common_name: String,
    /// Whether the chain was validated against the configured CA set
    pub verified:    bool,
    /// Lowercase hex SHA-256 of the end-entity certificate DER
    pub fingerprint: String,
}

impl TlsIdentity {
    /// Build the identity from a chain rustls has already verified.
    ///
    /// Only call this once the handshake has completed; the resulting identity
    /// is marked `verified`.
    pub fn from_verified_chain(chain: &[CertificateDer<'_>]) -> Result<Self, HandshakeError> {
        let end_entity = chain.first().ok_or(HandshakeError::NoPeerCertificate)?;
        let common_name = common_name(end_entity)?;

        Ok(Self {
            common_name,
            verified: true,
            fingerprint: fingerprint(end_entity),
        })
    }
}

/// Subject Common Name of a DER certificate
pub fn common_name(der: &[u8]) -> Result<String, HandshakeError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| HandshakeError::MalformedCertificate(e.to_string()))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .filter(|cn| !cn.is_empty())
        .map(str::to_owned)
        .ok_or(HandshakeError::MissingCommonName);
    cn
}

/// Client certificate verifier that runs `inner` and then requires the
/// end-entity certificate to carry a non-empty subject CN
#[derive(Debug)]
pub struct RequireCommonName {
    inner: Arc<dyn ClientCertVerifier>,
}

impl RequireCommonName {
    pub fn new(inner: Arc<dyn ClientCertVerifier>) -> Self {
        Self { inner }
    }
}

impl ClientCertVerifier for RequireCommonName {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;

        if let Err(e) = common_name(end_entity) {
            tracing::debug!(error = %e, "Refusing client certificate");
            return Err(rustls::Error::InvalidCertificate(CertificateError::Other(
                OtherError(Arc::new(e)),
            )));
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// SHA-256 fingerprint of a DER certificate
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}
