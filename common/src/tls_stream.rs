use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use rustls::{pki_types::CertificateDer, ClientConnection, Connection, ServerConnection};

use crate::error::{is_closed, Error, HandshakeError, Result};

/// How long a rejected peer gets to read our alert before the socket is dropped
const REJECT_LINGER: Duration = Duration::from_millis(500);
const REJECT_DRAIN_LIMIT: usize = 64 * 1024;

/// Synchronous TLS wrapper for TCP sockets
pub struct TlsStream {
    socket: TcpStream,
    tls:    Connection,
}

impl TlsStream {
    /// Wrap an accepted socket and complete the server-side handshake.
    ///
    /// On failure the alert is flushed and the socket is half-closed and
    /// drained briefly, so the peer reads the alert instead of a reset.
    pub fn from_server(socket: TcpStream, tls: ServerConnection) -> Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Server(tls),
        };
        if let Err(e) = stream.complete_handshake() {
            stream.linger_close();
            return Err(e);
        }
        Ok(stream)
    }

    /// Wrap a connected socket and complete the client-side handshake
    pub fn from_client(socket: TcpStream, tls: ClientConnection) -> Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Client(tls),
        };
        stream.complete_handshake()?;
        Ok(stream)
    }

    /// Complete the TLS handshake
    fn complete_handshake(&mut self) -> Result<()> {
        while self.tls.is_handshaking() {
            while self.tls.wants_write() {
                self.tls
                    .write_tls(&mut self.socket)
                    .map_err(|e| Error::from_tls_io(e, "handshake"))?;
            }
            if !self.tls.is_handshaking() {
                break;
            }
            if self.tls.wants_read() {
                let n = self
                    .tls
                    .read_tls(&mut self.socket)
                    .map_err(|e| Error::from_tls_io(e, "handshake"))?;

                if let Err(e) = self.tls.process_new_packets() {
                    // best effort: tell the peer why
                    let _ = self.tls.write_tls(&mut self.socket);
                    return Err(HandshakeError::Tls(e).into());
                }

                if n == 0 && self.tls.is_handshaking() {
                    return Err(Error::ConnectionClosed { during: "handshake" });
                }
            }
        }

        // flush the final flight (e.g. the client's Finished)
        while self.tls.wants_write() {
            self.tls
                .write_tls(&mut self.socket)
                .map_err(|e| Error::from_tls_io(e, "handshake"))?;
        }
        Ok(())
    }

    /// Certificates the peer presented, end-entity first
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.tls.peer_certificates()
    }

    /// Negotiated protocol version, once the handshake has completed
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.tls.protocol_version()
    }

    /// Remote address of the underlying socket
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Send close_notify and flush it to the peer
    pub fn close(&mut self) -> io::Result<()> {
        self.tls.send_close_notify();
        self.flush()
    }

    fn linger_close(&mut self) {
        let _ = self.socket.shutdown(Shutdown::Write);
        let _ = self.socket.set_read_timeout(Some(REJECT_LINGER));

        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        while drained < REJECT_DRAIN_LIMIT {
            match self.socket.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // Try to read buffered plaintext first
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // Pending records (alerts, key updates) go out before we block
            while self.tls.wants_write() {
                match self.tls.write_tls(&mut self.socket) {
                    Ok(_) => {}
                    Err(e) if is_closed(&e) => break,
                    Err(e) => return Err(e),
                }
            }

            // Read and process new TLS data; EOF is recorded by rustls and
            // reported by the reader on the next iteration
            self.tls.read_tls(&mut self.socket)?;
            if let Err(e) = self.tls.process_new_packets() {
                let _ = self.tls.write_tls(&mut self.socket);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.tls.writer().write(buf)?;

        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.socket)?;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Ensure any buffered plaintext is passed to the TLS session
        self.tls.writer().flush()?;

        // Send all pending TLS data, then flush the socket
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.socket)?;
        }
        self.socket.flush()
    }
}
