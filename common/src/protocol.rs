//! Minimal HTTP/1.1 framing for the single request/response exchange.
//!
//! Only what the exchange needs: a request line plus headers from the client,
//! a status line, `Content-Length` and body from the server. Heads are capped
//! at [`MAX_HEAD_BYTES`].

use std::io::{BufRead, Read, Write};

use crate::error::{Error, Result};

/// Upper bound on a request or response head
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

const HTTP_VERSION: &str = "HTTP/1.1";

/// An application-level request: method plus path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path:   String,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path:   path.into(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }
}

/// A complete response: status plus byte body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body:   Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body:   body.into(),
        }
    }
}

/// Status line and framing information of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status:         u16,
    pub content_length: Option<usize>,
}

/// Write a request head. `host` fills the `Host` header.
pub fn write_request<W: Write>(w: &mut W, request: &Request, host: &str) -> Result<()> {
    if !is_token(&request.method) || request.path.is_empty() || request.path.contains(' ') {
        return Err(Error::Protocol(format!(
            "refusing to send invalid request line {} {}",
            request.method, request.path
        )));
    }

    let head = format!(
        "{} {} {HTTP_VERSION}\r\nHost: {host}\r\nConnection: close\r\n\r\n",
        request.method, request.path
    );
    w.write_all(head.as_bytes())?;
    w.flush()?;
    Ok(())
}

/// Read a request head, discarding headers the exchange does not use
pub fn read_request<R: BufRead>(r: &mut R) -> Result<Request> {
    let lines = read_head(r, "request")?;
    let request_line = &lines[0];

    let mut parts = request_line.split(' ');
    let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v), None) => (m, p, v),
        _ => {
            return Err(Error::Protocol(format!(
                "malformed request line {request_line:?}"
            )))
        }
    };

    if !is_token(method) || path.is_empty() || !version.starts_with("HTTP/1.") {
        return Err(Error::Protocol(format!(
            "malformed request line {request_line:?}"
        )));
    }

    Ok(Request::new(method, path))
}

/// Write a full response with `Content-Length` framing
pub fn write_response<W: Write>(w: &mut W, response: &Response) -> Result<()> {
    let head = format!(
        "{HTTP_VERSION} {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        response.body.len()
    );
    w.write_all(head.as_bytes())?;
    w.write_all(&response.body)?;
    w.flush()?;
    Ok(())
}

/// Read a response head; the body is left unread in `r`
pub fn read_response_head<R: BufRead>(r: &mut R) -> Result<ResponseHead> {
    let lines = read_head(r, "response")?;
    let status_line = &lines[0];

    let mut parts = status_line.splitn(3, ' ');
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse::<u16>()
            .map_err(|_| Error::Protocol(format!("malformed status line {status_line:?}")))?,
        _ => {
            return Err(Error::Protocol(format!(
                "malformed status line {status_line:?}"
            )))
        }
    };

    let mut content_length = None;
    for line in &lines[1..] {
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header {line:?}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::Protocol(format!("invalid content length {value:?}")))?;
            content_length = Some(len);
        }
    }

    Ok(ResponseHead {
        status,
        content_length,
    })
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        _ => "Unknown",
    }
}

/// Read CRLF-terminated lines up to the blank line ending the head
fn read_head<R: BufRead>(r: &mut R, during: &'static str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut total = 0usize;

    loop {
        let mut raw = Vec::new();
        let n = r
            .by_ref()
            .take((MAX_HEAD_BYTES - total + 1) as u64)
            .read_until(b'\n', &mut raw)
            .map_err(|e| Error::from_tls_io(e, during))?;

        if n == 0 {
            return Err(if lines.is_empty() {
                Error::ConnectionClosed { during }
            } else {
                Error::Protocol(format!("{during} head ended early"))
            });
        }

        total += n;
        if total > MAX_HEAD_BYTES {
            return Err(Error::Protocol(format!(
                "{during} head exceeds {MAX_HEAD_BYTES} bytes"
            )));
        }
        if !raw.ends_with(b"\n") {
            return Err(Error::Protocol(format!("{during} head ended early")));
        }

        while matches!(raw.last(), Some(b'\n' | b'\r')) {
            raw.pop();
        }
        let line = String::from_utf8(raw)
            .map_err(|_| Error::Protocol(format!("{during} head is not valid UTF-8")))?;

        if line.is_empty() {
            if lines.is_empty() {
                // tolerate stray CRLF before the start line
                continue;
            }
            return Ok(lines);
        }
        lines.push(line);
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphabetic())
}
