//! Test PKI and server harness for end-to-end scenarios.
//!
//! Every test run mints a fresh CA with `rcgen`; nothing touches disk.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use certgate_client::{ClientConfig, MtlsClient};
use certgate_common::ConnectionConfig;
use certgate_server::{access_log::MemoryAccessLog, MtlsServer, ServerConfig, ServerHandle};
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams,
    CertificateRevocationListParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SanType,
    SerialNumber,
};
use rustls::pki_types::CertificateRevocationListDer;

/// A PEM certificate/key pair
pub struct Issued {
    pub cert_pem: String,
    pub key_pem:  String,
}

/// A throwaway certificate authority
pub struct TestCa {
    cert: Certificate,
    key:  KeyPair,
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().expect("CA key generation failed");
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).expect("CA self-signing failed");
        Self { cert, key }
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// Server certificate valid for `localhost` and 127.0.0.1
    pub fn issue_server(&self) -> Issued {
        let mut params = leaf_params("certgate-test-server");
        params.subject_alt_names = vec![
            SanType::DnsName("localhost".try_into().expect("valid DNS name")),
            SanType::IpAddress([127, 0, 0, 1].into()),
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.sign(params)
    }

    /// Client certificate with subject CN `cn`
    pub fn issue_client(&self, cn: &str) -> Issued {
        let mut params = leaf_params(cn);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.sign(params)
    }

    /// Client certificate whose validity ended years ago
    pub fn issue_expired_client(&self, cn: &str) -> Issued {
        let mut params = leaf_params(cn);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = date_time_ymd(2015, 1, 1);
        params.not_after = date_time_ymd(2016, 1, 1);
        self.sign(params)
    }

    /// Client certificate whose subject has no CN at all
    pub fn issue_client_without_cn(&self) -> Issued {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "certgate tests");
        params.distinguished_name = dn;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.sign(params)
    }

    /// Client certificate with a fixed serial, for revocation tests
    pub fn issue_client_with_serial(&self, cn: &str, serial: u64) -> Issued {
        let mut params = leaf_params(cn);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.serial_number = Some(SerialNumber::from(serial));
        self.sign(params)
    }

    /// PEM CRL signed by this CA revoking `serials`
    pub fn revocation_list_pem(&self, serials: &[u64]) -> String {
        let params = CertificateRevocationListParams {
            this_update:                date_time_ymd(2020, 1, 1),
            next_update:                date_time_ymd(2040, 1, 1),
            crl_number:                 SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs:              serials
                .iter()
                .map(|&serial| RevokedCertParams {
                    serial_number:   SerialNumber::from(serial),
                    revocation_time: date_time_ymd(2020, 1, 1),
                    reason_code:     Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method:      KeyIdMethod::Sha256,
        };
        params
            .signed_by(&self.cert, &self.key)
            .expect("CRL signing failed")
            .pem()
            .expect("CRL PEM encoding failed")
    }

    fn sign(&self, params: CertificateParams) -> Issued {
        let key = KeyPair::generate().expect("leaf key generation failed");
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("leaf signing failed");
        Issued {
            cert_pem: cert.pem(),
            key_pem:  key.serialize_pem(),
        }
    }
}

/// Client certificate signed by nobody but itself
pub fn self_signed_client(cn: &str) -> Issued {
    let key = KeyPair::generate().expect("key generation failed");
    let mut params = leaf_params(cn);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    let cert = params.self_signed(&key).expect("self-signing failed");
    Issued {
        cert_pem: cert.pem(),
        key_pem:  key.serialize_pem(),
    }
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "certgate tests");
    dn
}

fn leaf_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params
}

/// Credentials trusting `ca`
pub fn credentials(issued: &Issued, ca: &TestCa) -> ConnectionConfig {
    ConnectionConfig::from_pem(
        issued.cert_pem.as_bytes(),
        issued.key_pem.as_bytes(),
        ca.cert_pem().as_bytes(),
    )
    .expect("test credentials must load")
}

/// A server on an ephemeral port recording into memory
pub struct TestServer {
    pub handle: ServerHandle,
    pub log:    Arc<MemoryAccessLog>,
}

impl TestServer {
    pub fn start(ca: &TestCa) -> Self {
        Self::start_with_crls(ca, Vec::new())
    }

    /// Server that also checks client certificates against `crls`
    pub fn start_with_crls(ca: &TestCa, crls: Vec<CertificateRevocationListDer<'static>>) -> Self {
        let server_creds = credentials(&ca.issue_server(), ca);
        let log = Arc::new(MemoryAccessLog::new());
        let server = MtlsServer::new(
            ServerConfig::new(server_creds)
                .with_crls(crls)
                .with_io_timeout(Duration::from_secs(5)),
            log.clone(),
        )
        .expect("server config must build");
        let handle = server.start("127.0.0.1:0").expect("bind ephemeral port");
        Self { handle, log }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Client dialing this server with `issued`, trusting `ca`
    pub fn client(&self, issued: &Issued, ca: &TestCa) -> MtlsClient {
        let config = ClientConfig::new(credentials(issued, ca), self.addr().to_string())
            .with_server_name("localhost")
            .with_io_timeout(Duration::from_secs(5));
        MtlsClient::new(config).expect("client config must build")
    }
}
