use std::{
    env,
    path::{Path, PathBuf},
};

/// Address the server binds to unless `CERTGATE_BIND_ADDR` is set
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4433";

/// Address the client dials unless `CERTGATE_SERVER_ADDR` is set
pub const DEFAULT_SERVER_ADDR: &str = "localhost:4433";

pub const CERTS_DIR_ENV: &str = "CERTGATE_CERTS_DIR";
pub const BIND_ADDR_ENV: &str = "CERTGATE_BIND_ADDR";
pub const SERVER_ADDR_ENV: &str = "CERTGATE_SERVER_ADDR";
pub const SERVER_NAME_ENV: &str = "CERTGATE_SERVER_NAME";
pub const CRL_ENV: &str = "CERTGATE_CRL";
pub const ACCESS_LOG_FORMAT_ENV: &str = "CERTGATE_ACCESS_LOG_FORMAT";

const DEFAULT_CERTS_DIR: &str = "keys";
const CA_FILE: &str = "ca-crt.pem";

/// Base directory holding every role's key material
pub fn certs_dir() -> PathBuf {
    let dir = env::var(CERTS_DIR_ENV).unwrap_or(DEFAULT_CERTS_DIR.to_string());
    PathBuf::from(dir)
}

/// Reads an optional environment variable, treating blank values as unset.
pub fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Locations of the three PEM inputs a role needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    /// Path to the role's certificate chain
    pub cert_path: PathBuf,
    /// Path to the role's private key
    pub key_path:  PathBuf,
    /// Path to the trusted CA bundle
    pub ca_path:   PathBuf,
}

impl CredentialPaths {
    /// Server credentials under the configured certs directory
    pub fn server() -> Self {
        Self::server_in(certs_dir())
    }

    /// Server credentials: `server-crt.pem`, `server-key.pem`, `ca-crt.pem`
    pub fn server_in(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cert_path: dir.join("server-crt.pem"),
            key_path:  dir.join("server-key.pem"),
            ca_path:   dir.join(CA_FILE),
        }
    }

    /// Client credentials for the given identity selector under the
    /// configured certs directory
    pub fn client(identity: &str) -> Self {
        Self::client_in(certs_dir(), identity)
    }

    /// Client credentials: `client{N}-crt.pem`, `client{N}-key.pem`, `ca-crt.pem`
    pub fn client_in(dir: impl AsRef<Path>, identity: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            cert_path: dir.join(format!("client{identity}-crt.pem")),
            key_path:  dir.join(format!("client{identity}-key.pem")),
            ca_path:   dir.join(CA_FILE),
        }
    }
}
