//! certgate client library
//!
//! Dials a certgate server over TCP, presents a client certificate during the
//! TLS handshake, validates the server against the same trust root and
//! exchanges a single request/response.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Write;
//!
//! use certgate_client::{ClientConfig, MtlsClient, Request};
//! use certgate_common::{ConnectionConfig, CredentialPaths};
//!
//! # fn main() -> anyhow::Result<()> {
//! let credentials = ConnectionConfig::load(&CredentialPaths::client("1"))?;
//! let client = MtlsClient::new(ClientConfig::new(credentials, "localhost:4433"))?;
//!
//! let connection = client.connect()?;
//! let body = connection.send_request(&Request::get("/"))?;
//! for chunk in body {
//!     std::io::stdout().write_all(&chunk?)?;
//! }
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from certgate-common for convenience
pub use certgate_common::{ConnectionConfig, CredentialPaths, Error, Request};
