//! Minimal SDP parsing (RFC 4566)
//!
//! The server never interprets codec payloads; it only needs to know how
//! many media tracks a description advertises (to enforce track-count
//! invariants) and each track's `control:` attribute (so the source worker
//! can SETUP the right sub-URL). DESCRIBE responses return the publisher's
//! SDP text byte-identical — parsing is purely read-only.

use crate::error::ProtocolError;

/// A parsed session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Session-level attributes (`a=` lines before the first `m=`).
    pub attributes: Vec<Attribute>,
    /// One entry per `m=` section, in order.
    pub media_descriptions: Vec<MediaDescription>,
}

/// One `m=` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media type token (`video`, `audio`, ...).
    pub media: String,
    /// Transport protocol token, typically `RTP/AVP`.
    pub protocol: String,
    /// Payload format list.
    pub formats: Vec<String>,
    /// Media-level attributes.
    pub attributes: Vec<Attribute>,
}

/// An `a=` line, split at the first `:` when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: Option<String>,
}

impl SessionDescription {
    /// Parse an SDP body.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::InvalidSdp("not valid utf-8".to_string()))?;

        let mut lines = text.lines().filter(|l| !l.is_empty()).peekable();
        match lines.peek() {
            Some(&"v=0") => {}
            _ => return Err(ProtocolError::InvalidSdp("missing v=0".to_string())),
        }

        let mut session = SessionDescription {
            attributes: Vec::new(),
            media_descriptions: Vec::new(),
        };

        for line in lines {
            let (kind, value) = line.split_once('=').ok_or_else(|| {
                ProtocolError::InvalidSdp(format!("malformed line '{}'", line))
            })?;
            match kind {
                "m" => session
                    .media_descriptions
                    .push(MediaDescription::parse(value)?),
                "a" => {
                    let attr = Attribute::parse(value);
                    match session.media_descriptions.last_mut() {
                        Some(media) => media.attributes.push(attr),
                        None => session.attributes.push(attr),
                    }
                }
                // Origin, timing, connection and the rest are carried in the
                // raw text, never interpreted here.
                _ => {}
            }
        }

        Ok(session)
    }
}

impl MediaDescription {
    fn parse(value: &str) -> Result<Self, ProtocolError> {
        let mut fields = value.split_whitespace();
        let media = fields
            .next()
            .ok_or_else(|| ProtocolError::InvalidSdp(format!("empty m= line '{}'", value)))?;
        let _port = fields.next();
        let protocol = fields.next().unwrap_or_default();
        Ok(MediaDescription {
            media: media.to_string(),
            protocol: protocol.to_string(),
            formats: fields.map(str::to_string).collect(),
            attributes: Vec::new(),
        })
    }

    /// The `control:` attribute, used as the SETUP sub-URL for this track.
    pub fn control(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == "control")
            .and_then(|a| a.value.as_deref())
    }
}

impl Attribute {
    fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((key, v)) => Attribute {
                key: key.to_string(),
                value: Some(v.to_string()),
            },
            None => Attribute {
                key: value.to_string(),
                value: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRACKS: &[u8] = b"v=0\r\n\
        o=- 0 0 IN IP4 127.0.0.1\r\n\
        s=Stream\r\n\
        c=IN IP4 0.0.0.0\r\n\
        t=0 0\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=control:trackId=0\r\n\
        m=audio 0 RTP/AVP 97\r\n\
        a=rtpmap:97 MPEG4-GENERIC/48000/2\r\n\
        a=control:trackId=1\r\n";

    #[test]
    fn test_parse_two_tracks() {
        let sdp = SessionDescription::parse(TWO_TRACKS).unwrap();
        assert_eq!(sdp.media_descriptions.len(), 2);
        assert_eq!(sdp.media_descriptions[0].media, "video");
        assert_eq!(sdp.media_descriptions[0].protocol, "RTP/AVP");
        assert_eq!(sdp.media_descriptions[0].formats, vec!["96"]);
        assert_eq!(sdp.media_descriptions[0].control(), Some("trackId=0"));
        assert_eq!(sdp.media_descriptions[1].media, "audio");
        assert_eq!(sdp.media_descriptions[1].control(), Some("trackId=1"));
    }

    #[test]
    fn test_session_level_attributes_stay_at_session_level() {
        let sdp = SessionDescription::parse(b"v=0\r\na=tool:x\r\nm=video 0 RTP/AVP 96\r\n")
            .unwrap();
        assert_eq!(sdp.attributes.len(), 1);
        assert_eq!(sdp.attributes[0].key, "tool");
        assert!(sdp.media_descriptions[0].attributes.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_version() {
        assert!(SessionDescription::parse(b"o=- 0 0 IN IP4 0.0.0.0\r\n").is_err());
        assert!(SessionDescription::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_parse_tolerates_bare_newlines() {
        let sdp = SessionDescription::parse(b"v=0\nm=video 0 RTP/AVP 96\n").unwrap();
        assert_eq!(sdp.media_descriptions.len(), 1);
    }
}
