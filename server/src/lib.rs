//! certgate server
//!
//! A TCP listener that terminates TLS, requires a client certificate signed
//! by the configured CA, logs the authenticated peer's Common Name and answers
//! with a fixed response.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use certgate_common::{ConnectionConfig, CredentialPaths};
//! use certgate_server::{access_log::MemoryAccessLog, MtlsServer, ServerConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let credentials = ConnectionConfig::load(&CredentialPaths::server())?;
//! let log = Arc::new(MemoryAccessLog::new());
//! let server = MtlsServer::new(ServerConfig::new(credentials), log)?;
//!
//! let handle = server.start("127.0.0.1:0")?;
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod access_log;
pub mod handler;

use std::{
    io::{self, BufReader},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use certgate_common::{
    config::{self, env_opt},
    credentials::load_crls,
    error::{Error, Result},
    protocol, ConnectionConfig, HandshakeError, TlsIdentity, TlsStream,
};
use chrono::Utc;
use rustls::{
    pki_types::CertificateRevocationListDer, ServerConfig as RustlsServerConfig, ServerConnection,
};

use crate::access_log::AccessLog;

/// Configuration for the mTLS listener
#[derive(Debug)]
pub struct ServerConfig {
    /// Server key, certificate and trusted client CA set
    pub credentials: ConnectionConfig,
    /// Revocation lists checked against client certificates; empty disables
    /// revocation checking
    pub crls:        Vec<CertificateRevocationListDer<'static>>,
    /// Per-connection socket read/write timeout
    pub io_timeout:  Duration,
}

impl ServerConfig {
    /// Creates a server configuration with default settings
    pub fn new(credentials: ConnectionConfig) -> Self {
        Self {
            credentials,
            crls: Vec::new(),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Set the revocation lists
    pub fn with_crls(mut self, crls: Vec<CertificateRevocationListDer<'static>>) -> Self {
        self.crls = crls;
        self
    }

    /// Set the per-connection I/O timeout
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Load credentials from the configured certs directory and an optional
    /// CRL from `CERTGATE_CRL`
    pub fn from_env() -> Result<Self> {
        let credentials = ConnectionConfig::load(&config::CredentialPaths::server())?;
        let mut server_config = Self::new(credentials);

        if let Some(crl_path) = env_opt(config::CRL_ENV) {
            tracing::info!("Loading revocation list from {}", crl_path);
            server_config = server_config.with_crls(load_crls(Path::new(&crl_path))?);
        }
        Ok(server_config)
    }
}

/// A mutual TLS server that authenticates every client by certificate and
/// records one access entry per request.
#[derive(Clone)]
pub struct MtlsServer {
    tls_config: Arc<RustlsServerConfig>,
    access_log: Arc<dyn AccessLog>,
    io_timeout: Duration,
}

impl MtlsServer {
    /// Build the TLS configuration. Fails with a credential error if the key
    /// does not match the certificate or the verifier cannot be built.
    pub fn new(config: ServerConfig, access_log: Arc<dyn AccessLog>) -> Result<Self> {
        let tls_config = config.credentials.server_tls_config(config.crls)?;

        Ok(Self {
            tls_config,
            access_log,
            io_timeout: config.io_timeout,
        })
    }

    /// Bind `addr` and serve on a background thread until the returned handle
    /// is shut down.
    pub fn start<A: ToSocketAddrs>(&self, addr: A) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = self.clone();
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("certgate-accept".to_string())
            .spawn(move || server.run_with_shutdown(listener, flag))?;

        tracing::info!("listening on {}", local_addr);
        Ok(ServerHandle {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Bind `addr` and serve on the calling thread forever
    pub fn serve<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!("listening on {}", listener.local_addr()?);

        for connection in listener.incoming() {
            match connection {
                Ok(socket) => self.dispatch(socket),
                Err(e) => tracing::error!("Incoming connection failed: {}", e),
            }
        }
        Ok(())
    }

    /// Blocking accept loop; `ServerHandle::stop` sets `shutdown` and then
    /// connects once to wake it
    fn run_with_shutdown(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        for connection in listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match connection {
                Ok(socket) => self.dispatch(socket),
                Err(e) => tracing::error!("Incoming connection failed: {}", e),
            }
        }

        tracing::info!("Server shutdown signal received, stopping gracefully");
        Ok(())
    }

    /// Hand `socket` to its own thread, dropping it if no thread can be made
    fn dispatch(&self, socket: TcpStream) {
        if let Err(e) = self.spawn_connection(socket) {
            tracing::error!(error = %e, "Failed to spawn connection thread, dropping connection");
        }
    }

    fn spawn_connection(&self, socket: TcpStream) -> io::Result<JoinHandle<()>> {
        let server = self.clone();
        let span = tracing::info_span!(
            "connection",
            connection_id = %uuid::Uuid::new_v4(),
            remote = %socket
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        );

        thread::Builder::new()
            .name("certgate-conn".to_string())
            .spawn(move || {
                let _entered = span.enter();
                match server.handle_client(socket) {
                    Ok(()) => {}
                    Err(Error::Handshake(e)) => {
                        // logged only; the peer sees nothing but the TLS alert
                        tracing::warn!(error = %e, "Rejected client handshake");
                    }
                    Err(Error::ConnectionClosed { during }) => {
                        tracing::info!("Client closed connection during {}", during);
                    }
                    Err(e) => tracing::error!(error = %e, "Client handler error"),
                }
            })
    }

    /// Handshake, identify, log, respond
    fn handle_client(&self, socket: TcpStream) -> Result<()> {
        let remote = socket.peer_addr()?;
        socket.set_read_timeout(Some(self.io_timeout))?;
        socket.set_write_timeout(Some(self.io_timeout))?;

        let tls_conn = ServerConnection::new(Arc::clone(&self.tls_config))
            .map_err(|e| Error::Handshake(HandshakeError::Tls(e)))?;
        let mut tls_stream = TlsStream::from_server(socket, tls_conn)?;

        let identity = TlsIdentity::from_verified_chain(
            tls_stream.peer_certificates().unwrap_or_default(),
        )?;
        tracing::debug!(
            cn = %identity.common_name,
            fingerprint = %identity.fingerprint,
            version = ?tls_stream.protocol_version(),
            "TLS connection established with client certificate verification"
        );

        let request = {
            let mut reader = BufReader::new(&mut tls_stream);
            protocol::read_request(&mut reader)?
        };

        let (record, response) = handler::handle(&identity, remote, &request, Utc::now());
        self.access_log.append(&record)?;
        tracing::info!(
            cn = %record.peer_common_name,
            method = %record.method,
            path = %record.path,
            "Request accepted"
        );

        protocol::write_response(&mut tls_stream, &response)
            .and_then(|()| tls_stream.close().map_err(Error::from))
            .map_err(|e| match e {
                Error::Io(io) => Error::from_tls_io(io, "response"),
                other => other,
            })
    }
}

/// A running background listener
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown:   Arc<AtomicBool>,
    thread:     Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    /// Address the listener is bound to (resolves `:0` to the real port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to exit. Connections
    /// already in flight finish on their own threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = TcpStream::connect(wake_addr(self.local_addr)) {
            // the loop stays parked in accept; leave the thread detached
            tracing::error!("Failed to wake accept loop on {}: {}", self.local_addr, e);
            return;
        }
        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Accept loop failed: {}", e),
            Err(_) => tracing::error!("Accept loop panicked"),
        }
    }
}

/// Connectable form of a bound address: wildcard binds are reached over
/// loopback
fn wake_addr(bound: SocketAddr) -> SocketAddr {
    let mut addr = bound;
    if addr.ip().is_unspecified() {
        let loopback: IpAddr = match addr {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        addr.set_ip(loopback);
    }
    addr
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
