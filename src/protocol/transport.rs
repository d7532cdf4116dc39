//! `Transport` header negotiation (RFC 2326 §12.39)
//!
//! Two forms are accepted:
//!
//! ```text
//! Transport: RTP/AVP;unicast;client_port=35000-35001            (UDP)
//! Transport: RTP/AVP/TCP;unicast;interleaved=0-1                (interleaved TCP)
//! ```
//!
//! Publishing clients append `mode=record`. The port pair carries UDP ports
//! in the first form and interleaved channel numbers in the second.

use std::fmt;

use crate::error::ProtocolError;

/// How RTP/RTCP travel for one client: datagrams or interleaved frames on
/// the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    Udp,
    Tcp,
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProtocol::Udp => write!(f, "udp"),
            StreamProtocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Direction requested by the SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Receiving client (default when no `mode` parameter is present).
    Play,
    /// Publishing client (`mode=record`).
    Record,
}

/// Parsed client `Transport` header.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub protocol: StreamProtocol,
    pub mode: TransportMode,
    /// UDP port (UDP) or interleaved channel (TCP) for RTP.
    pub rtp_port: u16,
    /// UDP port (UDP) or interleaved channel (TCP) for RTCP.
    pub rtcp_port: u16,
}

impl TransportHeader {
    /// Parse a client `Transport` header value.
    pub fn parse(header: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidTransport(header.to_string());

        let mut parts = header.split(';').map(str::trim);
        let proto = parts.next().ok_or_else(invalid)?;
        let protocol = match proto {
            "RTP/AVP" | "RTP/AVP/UDP" => StreamProtocol::Udp,
            "RTP/AVP/TCP" => StreamProtocol::Tcp,
            _ => return Err(invalid()),
        };

        let mut mode = TransportMode::Play;
        let mut ports = None;
        for part in parts {
            if let Some(value) = part.strip_prefix("client_port=") {
                if protocol == StreamProtocol::Udp {
                    ports = Some(parse_pair(value).ok_or_else(invalid)?);
                }
            } else if let Some(value) = part.strip_prefix("interleaved=") {
                if protocol == StreamProtocol::Tcp {
                    ports = Some(parse_pair(value).ok_or_else(invalid)?);
                }
            } else if let Some(value) = part.strip_prefix("mode=") {
                match value.trim_matches('"') {
                    m if m.eq_ignore_ascii_case("record") => mode = TransportMode::Record,
                    m if m.eq_ignore_ascii_case("play") => mode = TransportMode::Play,
                    _ => return Err(invalid()),
                }
            }
        }

        let (rtp_port, rtcp_port) = ports.ok_or_else(invalid)?;
        Ok(TransportHeader {
            protocol,
            mode,
            rtp_port,
            rtcp_port,
        })
    }
}

fn parse_pair(value: &str) -> Option<(u16, u16)> {
    let (a, b) = value.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Server answer for a UDP SETUP.
pub fn answer_udp(client_rtp: u16, client_rtcp: u16, server_rtp: u16, server_rtcp: u16) -> String {
    format!(
        "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
        client_rtp, client_rtcp, server_rtp, server_rtcp
    )
}

/// Server answer for an interleaved TCP SETUP.
pub fn answer_tcp(rtp_channel: u16, rtcp_channel: u16) -> String {
    format!(
        "RTP/AVP/TCP;unicast;interleaved={}-{}",
        rtp_channel, rtcp_channel
    )
}

/// Client request for a UDP SETUP (source worker side).
pub fn request_udp(rtp_port: u16, rtcp_port: u16) -> String {
    format!("RTP/AVP;unicast;client_port={}-{}", rtp_port, rtcp_port)
}

/// Client request for an interleaved TCP SETUP (source worker side).
pub fn request_tcp(rtp_channel: u16, rtcp_channel: u16) -> String {
    format!(
        "RTP/AVP/TCP;unicast;interleaved={}-{}",
        rtp_channel, rtcp_channel
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udp_play() {
        let t = TransportHeader::parse("RTP/AVP;unicast;client_port=35000-35001").unwrap();
        assert_eq!(t.protocol, StreamProtocol::Udp);
        assert_eq!(t.mode, TransportMode::Play);
        assert_eq!((t.rtp_port, t.rtcp_port), (35000, 35001));
    }

    #[test]
    fn test_parse_tcp_record() {
        let t = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3;mode=record").unwrap();
        assert_eq!(t.protocol, StreamProtocol::Tcp);
        assert_eq!(t.mode, TransportMode::Record);
        assert_eq!((t.rtp_port, t.rtcp_port), (2, 3));
    }

    #[test]
    fn test_parse_quoted_mode() {
        let t =
            TransportHeader::parse("RTP/AVP;unicast;client_port=40000-40001;mode=\"RECORD\"")
                .unwrap();
        assert_eq!(t.mode, TransportMode::Record);
    }

    #[test]
    fn test_parse_missing_ports() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_err());
        // a channel pair on a UDP transport does not count
        assert!(TransportHeader::parse("RTP/AVP;unicast;interleaved=0-1").is_err());
    }

    #[test]
    fn test_parse_unknown_protocol() {
        assert!(TransportHeader::parse("RAW/RAW/UDP;client_port=1-2").is_err());
    }

    #[test]
    fn test_answers() {
        assert_eq!(
            answer_udp(35000, 35001, 8000, 8001),
            "RTP/AVP;unicast;client_port=35000-35001;server_port=8000-8001"
        );
        assert_eq!(answer_tcp(0, 1), "RTP/AVP/TCP;unicast;interleaved=0-1");
    }
}
