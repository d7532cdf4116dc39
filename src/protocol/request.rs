//! RTSP request parsing
//!
//! Requests follow HTTP/1.1 syntax (RFC 2326 §6): a request line, a header
//! block terminated by a blank line, and an optional body whose length is
//! given by `Content-Length`. The reader splits head and body; this module
//! parses the head.

use crate::error::ProtocolError;

/// RTSP methods this server reacts to. Anything else is answered with
/// 405 Method Not Allowed by the session.
pub const SUPPORTED_METHODS: &str =
    "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, PAUSE, TEARDOWN";

/// A parsed RTSP request head.
#[derive(Debug)]
pub struct Request {
    /// Method token (DESCRIBE, SETUP, ...). Kept as received.
    pub method: String,
    /// Request-URI, e.g. `rtsp://host:8554/cam/trackId=0`.
    pub uri: String,
    /// Protocol version, expected `RTSP/1.0`.
    pub version: String,
    /// Headers in arrival order. Lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Parse a request head (request line + headers, no body).
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(ProtocolError::EmptyMessage)?;
        let mut parts = request_line.split_whitespace();
        let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(u), Some(v), None) => (m, u, v),
            _ => {
                return Err(ProtocolError::InvalidRequestLine(
                    request_line.to_string(),
                ))
            }
        };

        if version != "RTSP/1.0" {
            tracing::warn!(version, "peer sent non-RTSP/1.0 version");
        }

        let headers = parse_headers(lines)?;

        Ok(Request {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup (RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    /// CSeq value, echoed verbatim into the response.
    pub fn cseq(&self) -> Option<&str> {
        self.header("CSeq")
    }

    /// Declared body length, 0 when absent or unparsable.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Session header value, if the client presented one.
    pub fn session(&self) -> Option<&str> {
        self.header("Session")
    }
}

/// Parse `Name: Value` lines until the block ends.
pub(crate) fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>, ProtocolError> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

pub(crate) fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let req = Request::parse("OPTIONS rtsp://localhost:8554/cam RTSP/1.0\r\nCSeq: 1\r\n\r\n")
            .unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/cam");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn test_parse_setup_transport() {
        let raw = "SETUP rtsp://localhost:8554/cam/trackId=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=35000-35001\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(
            req.header("Transport"),
            Some("RTP/AVP;unicast;client_port=35000-35001")
        );
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let req =
            Request::parse("DESCRIBE rtsp://h/p RTSP/1.0\r\ncseq: 7\r\ncontent-length: 12\r\n\r\n")
                .unwrap();
        assert_eq!(req.cseq(), Some("7"));
        assert_eq!(req.content_length(), 12);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Request::parse("").is_err());
        assert!(Request::parse("DESCRIBE\r\n\r\n").is_err());
        assert!(Request::parse("DESCRIBE rtsp://h/p RTSP/1.0\r\nnocolon\r\n\r\n").is_err());
    }
}
