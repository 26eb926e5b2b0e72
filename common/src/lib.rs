//! certgate common library
//!
//! This crate provides the pieces shared by the certgate server and client:
//!
//! - Credential loading (private key, certificate chain, trusted CA bundle)
//! - The error taxonomy used by both roles
//! - Peer identity extraction from a verified certificate
//! - A blocking TLS stream wrapper over TCP
//! - The minimal HTTP/1.1 request/response framing spoken over the channel
//!
//! # Features
//!
//! - **Mutual TLS**: both roles present certificates and validate the peer
//!   against the same trust root
//! - **Identity extraction**: the peer's subject Common Name becomes the audit
//!   identity
//! - **Injected credentials**: PEM bytes or file paths, resolved from
//!   environment-driven defaults

/// Certificate locations and environment-driven defaults
pub mod config;

/// Credential loading and rustls configuration
pub mod credentials;

/// Error taxonomy shared by both roles
pub mod error;

/// Peer identity extraction from verified certificates
pub mod identity;

/// Request/response framing over the TLS channel
pub mod protocol;

/// TLS stream wrapper for TCP connections
pub mod tls_stream;

// Re-export commonly used types for convenience
pub use config::CredentialPaths;
pub use credentials::ConnectionConfig;
pub use error::{ConnectError, CredentialLoadError, Error, HandshakeError, Result};
pub use identity::TlsIdentity;
pub use protocol::{Request, Response};
pub use tls_stream::TlsStream;
