//! RTSP 1.0 wire protocol (RFC 2326)
//!
//! Text-based request/response parsing and serialization, `Transport`
//! header negotiation, and the `$`-prefixed interleaved framing that
//! carries RTP/RTCP inside the control connection.
//!
//! This layer is pure: it works on byte slices and strings and performs no
//! I/O. Sessions and source workers own the sockets and feed bytes in.

pub mod interleaved;
pub mod request;
pub mod response;
pub mod transport;

pub use interleaved::{InterleavedFrame, INTERLEAVED_MAGIC};
pub use request::Request;
pub use response::Response;
pub use transport::TransportHeader;

/// Extract the stream path from an RTSP request URI.
///
/// The first path segment names the stream; anything after it (track
/// selectors appended by SETUP, trailing slashes) is ignored:
///
/// ```
/// use rtsp_simple_server::protocol::path_from_uri;
///
/// assert_eq!(path_from_uri("rtsp://host:8554/cam"), Some("cam".to_string()));
/// assert_eq!(path_from_uri("rtsp://host/cam/trackId=1"), Some("cam".to_string()));
/// assert_eq!(path_from_uri("rtsp://host:8554/"), None);
/// ```
pub fn path_from_uri(uri: &str) -> Option<String> {
    let rest = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))?;
    let path = rest.split_once('/').map(|(_, p)| p)?;
    let first = path.split('/').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_from_uri_plain() {
        assert_eq!(path_from_uri("rtsp://host:8554/cam"), Some("cam".into()));
    }

    #[test]
    fn test_path_from_uri_with_track() {
        assert_eq!(
            path_from_uri("rtsp://host:8554/cam/trackId=0"),
            Some("cam".into())
        );
    }

    #[test]
    fn test_path_from_uri_missing() {
        assert_eq!(path_from_uri("rtsp://host:8554"), None);
        assert_eq!(path_from_uri("rtsp://host:8554/"), None);
        assert_eq!(path_from_uri("http://host/cam"), None);
        assert_eq!(path_from_uri("*"), None);
    }
}
