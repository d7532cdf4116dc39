//! RTSP response building and parsing
//!
//! The server side builds responses with a small builder; the source worker
//! (client side) parses the responses its upstream sends back. Serialization
//! computes `Content-Length` automatically when a body is attached.

use bytes::Bytes;

use crate::error::ProtocolError;

use super::request::{lookup, parse_headers};

/// Identification string sent in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = concat!("rtsp-simple-server/", env!("CARGO_PKG_VERSION"));

/// An RTSP response (RFC 2326 §7).
#[derive(Debug)]
#[must_use]
pub struct Response {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Response {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Serialize to the wire format. `Content-Length` is appended when a
    /// body is present (RFC 2326 §12.14).
    pub fn serialize(&self) -> Bytes {
        let mut out = format!(
            "RTSP/1.0 {} {}\r\n",
            self.status_code, self.status_text
        );
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
            let mut buf = out.into_bytes();
            buf.extend_from_slice(&self.body);
            Bytes::from(buf)
        } else {
            out.push_str("\r\n");
            Bytes::from(out)
        }
    }

    /// Parse a response head (status line + headers, no body). Used by the
    /// source worker when talking to its upstream.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut lines = raw.lines();
        let status_line = lines.next().ok_or(ProtocolError::EmptyMessage)?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let (code, text) = match (version.starts_with("RTSP/"), code) {
            (true, Some(code)) => (code, parts.next().unwrap_or_default()),
            _ => return Err(ProtocolError::InvalidStatusLine(status_line.to_string())),
        };

        Ok(Response {
            status_code: code,
            status_text: text.to_string(),
            headers: parse_headers(lines)?,
            body: Bytes::new(),
        })
    }

    /// Case-insensitive header lookup.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    /// Declared body length, 0 when absent.
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}
