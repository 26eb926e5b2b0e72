use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias used across the certgate crates
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for both the listener and the dialer
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    CredentialLoad(#[from] CredentialLoadError),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Peer closed the stream before `during` completed
    #[error("connection closed during {during}")]
    ConnectionClosed { during: &'static str },

    /// Peer closed the stream before the declared payload arrived
    #[error("response truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Classifies an I/O error raised on a TLS stream.
    ///
    /// rustls failures travel inside `io::Error` as `InvalidData`; those become
    /// [`HandshakeError::Tls`], which also covers a fatal alert received after
    /// the local handshake finished (TLS 1.3 client authentication). Resets
    /// and EOFs become [`Error::ConnectionClosed`].
    pub fn from_tls_io(err: io::Error, during: &'static str) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return match err.into_inner().map(|inner| inner.downcast::<rustls::Error>()) {
                Some(Ok(tls)) => Error::Handshake(HandshakeError::Tls(*tls)),
                Some(Err(other)) => Error::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
                None => Error::Protocol("empty TLS error".to_string()),
            };
        }

        if is_closed(&err) {
            Error::ConnectionClosed { during }
        } else {
            Error::Io(err)
        }
    }

    /// Whether the error is a handshake rejection
    pub fn is_handshake(&self) -> bool {
        matches!(self, Error::Handshake(_))
    }
}

/// Whether an I/O error means the peer went away
pub fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// A key, certificate or CA input is missing or unusable. Fatal at startup.
#[derive(Debug, Error)]
pub enum CredentialLoadError {
    #[error("failed to read {what} from {path:?}: {source}")]
    Read {
        what:   &'static str,
        path:   PathBuf,
        source: io::Error,
    },

    #[error("failed to parse {what} PEM data: {source}")]
    Parse {
        what:   &'static str,
        source: io::Error,
    },

    #[error("no certificates found in {what}")]
    NoCertificates { what: &'static str },

    #[error("no private key found")]
    NoPrivateKey,

    #[error("no valid CA certificates in trust bundle")]
    EmptyTrustStore,

    #[error("TLS configuration rejected credentials: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// The peer failed certificate validation or identity extraction
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Tls(rustls::Error),

    #[error("peer presented no certificate")]
    NoPeerCertificate,

    #[error("peer certificate could not be parsed: {0}")]
    MalformedCertificate(String),

    #[error("peer certificate subject has no common name")]
    MissingCommonName,
}

/// The TCP connection could not be established. Client role only.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("{addr} resolved to no addresses")]
    NoAddress { addr: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_errors_inside_io_become_handshake_errors() {
        let io_err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(rustls::AlertDescription::CertificateRequired),
        );
        let err = Error::from_tls_io(io_err, "response");
        assert!(err.is_handshake());
        assert!(matches!(
            err,
            Error::Handshake(HandshakeError::Tls(rustls::Error::AlertReceived(
                rustls::AlertDescription::CertificateRequired
            )))
        ));
    }

    #[test]
    fn resets_become_connection_closed() {
        let io_err = io::Error::from(io::ErrorKind::ConnectionReset);
        match Error::from_tls_io(io_err, "request") {
            Error::ConnectionClosed { during } => assert_eq!(during, "request"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_io_errors_pass_through() {
        let io_err = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(Error::from_tls_io(io_err, "request"), Error::Io(_)));
    }
}
