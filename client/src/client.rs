use std::{
    io::{BufRead, BufReader, Write},
    iter::FusedIterator,
    net::{TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use certgate_common::{
    error::{ConnectError, Error, HandshakeError, Result},
    protocol::{self, Request},
    ConnectionConfig, TlsStream,
};
use rustls::{pki_types::ServerName, ClientConfig as RustlsClientConfig, ClientConnection};

/// Size of the chunks yielded by [`ResponseBody`]
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for the mTLS client
#[derive(Debug)]
pub struct ClientConfig {
    /// Client key, certificate and trusted server CA set
    pub credentials:     ConnectionConfig,
    /// Target `host:port`
    pub server_addr:     String,
    /// Name the server certificate must match; defaults to the target host
    pub server_name:     Option<String>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Socket read/write timeout once connected
    pub io_timeout:      Duration,
}

impl ClientConfig {
    /// Creates a client configuration with default timeouts
    pub fn new(credentials: ConnectionConfig, server_addr: impl Into<String>) -> Self {
        Self {
            credentials,
            server_addr: server_addr.into(),
            server_name: None,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Set the TLS server name
    pub fn with_server_name<S: Into<String>>(mut self, server_name: S) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Set the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket I/O timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

/// Dialer for a certgate server
#[derive(Clone)]
pub struct MtlsClient {
    tls_config:      Arc<RustlsClientConfig>,
    server_addr:     String,
    server_name:     ServerName<'static>,
    connect_timeout: Duration,
    io_timeout:      Duration,
}

impl MtlsClient {
    /// Build the TLS configuration from the loaded credentials
    pub fn new(config: ClientConfig) -> Result<Self> {
        let tls_config = config.credentials.client_tls_config()?;

        let name = match config.server_name {
            Some(name) => name,
            None => host_of(&config.server_addr).to_string(),
        };
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| ConnectError::InvalidServerName(name))?;

        Ok(Self {
            tls_config,
            server_addr: config.server_addr,
            server_name,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        })
    }

    /// Connect over TCP and complete the TLS handshake
    pub fn connect(&self) -> Result<Connection> {
        tracing::debug!("Connecting to {}", self.server_addr);
        let socket = self.dial()?;
        socket.set_read_timeout(Some(self.io_timeout))?;
        socket.set_write_timeout(Some(self.io_timeout))?;

        tracing::debug!("Socket connected, establishing TLS...");
        let client_conn = ClientConnection::new(Arc::clone(&self.tls_config), self.server_name.clone())
            .map_err(HandshakeError::Tls)?;
        let stream = TlsStream::from_client(socket, client_conn)?;

        tracing::debug!(version = ?stream.protocol_version(), "Secure connection established");
        Ok(Connection {
            stream,
            host: host_of(&self.server_addr).to_string(),
        })
    }

    /// Connect, send one request and return the response body
    pub fn fetch(&self, request: &Request) -> Result<ResponseBody> {
        self.connect()?.send_request(request)
    }

    fn dial(&self) -> Result<TcpStream, ConnectError> {
        let addrs = self
            .server_addr
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                addr: self.server_addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(source) => ConnectError::Connect {
                addr: self.server_addr.clone(),
                source,
            },
            None => ConnectError::NoAddress {
                addr: self.server_addr.clone(),
            },
        })
    }
}

/// An established, authenticated connection
pub struct Connection {
    stream: TlsStream,
    host:   String,
}

impl Connection {
    /// Send `request` and read the response head.
    ///
    /// A server that rejects our certificate answers the first read with a
    /// fatal alert; that surfaces here as [`Error::Handshake`].
    pub fn send_request(mut self, request: &Request) -> Result<ResponseBody> {
        protocol::write_request(&mut self.stream, request, &self.host).map_err(|e| match e {
            Error::Io(io) => Error::from_tls_io(io, "request"),
            other => other,
        })?;

        let mut reader = BufReader::with_capacity(CHUNK_SIZE, self.stream);
        let head = protocol::read_response_head(&mut reader)?;
        tracing::debug!(status = head.status, length = ?head.content_length, "Response head received");

        Ok(ResponseBody {
            reader,
            status: head.status,
            remaining: head.content_length,
            expected: head.content_length,
            received: 0,
            done: false,
        })
    }
}

/// Lazy sequence of response body chunks.
///
/// Ends after `Content-Length` bytes or when the server closes the stream.
/// Once finished it keeps returning `None`.
pub struct ResponseBody {
    reader:    BufReader<TlsStream>,
    status:    u16,
    remaining: Option<usize>,
    expected:  Option<usize>,
    received:  usize,
    done:      bool,
}

impl ResponseBody {
    /// Status code from the response head
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Copy every chunk to `out` as it arrives, flushing after each one.
    /// Returns the number of body bytes written.
    pub fn stream_to<W: Write>(&mut self, out: &mut W) -> Result<usize> {
        let mut written = 0;
        while let Some(chunk) = self.next() {
            let chunk = chunk?;
            out.write_all(&chunk)?;
            out.flush()?;
            written += chunk.len();
        }
        Ok(written)
    }

    /// Read the rest of the body into memory
    pub fn collect_bytes(mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.stream_to(&mut body)?;
        Ok(body)
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(n) => n.min(CHUNK_SIZE),
            None => CHUNK_SIZE,
        };

        let filled = self.reader.fill_buf().map(|buf| buf.len());
        let available = match filled {
            Ok(n) => n,
            // a missing close_notify only matters when a length was promised
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && self.expected.is_none() => {
                return Ok(None);
            }
            Err(e) => {
                return Err(match Error::from_tls_io(e, "response") {
                    Error::ConnectionClosed { .. } => self.truncated(),
                    other => other,
                })
            }
        };

        if available == 0 {
            return match self.expected {
                Some(_) => Err(self.truncated()),
                None => Ok(None),
            };
        }

        let take = want.min(available);
        let chunk = self.reader.buffer()[..take].to_vec();
        self.reader.consume(take);

        self.received += take;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= take;
        }
        Ok(Some(chunk))
    }

    fn truncated(&self) -> Error {
        match self.expected {
            Some(expected) => Error::Truncated {
                expected,
                received: self.received,
            },
            None => Error::ConnectionClosed { during: "response" },
        }
    }
}

impl Iterator for ResponseBody {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for ResponseBody {}

/// Host part of `host:port`, with IPv6 brackets removed
fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
