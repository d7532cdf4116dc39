//! Per-track arrival statistics for publisher streams
//!
//! The coordinator feeds every UDP frame received from a publisher into the
//! track's [`RtcpReceiver`]. The bookkeeping is intentionally small: RTP
//! packet/byte counts, sequence-gap loss detection (RFC 3550 §6.4.1
//! semantics, without the jitter machinery), and the NTP timestamp of the
//! last RTCP Sender Report.

use crate::coordinator::StreamType;

const RTP_VERSION: u8 = 2;
const RTP_HEADER_LEN: usize = 12;
const RTCP_PACKET_TYPE_SR: u8 = 200;

/// Arrival statistics for one publisher track.
#[derive(Debug, Default)]
pub struct RtcpReceiver {
    rtp_packets: u64,
    rtp_bytes: u64,
    lost: u64,
    max_seq: Option<u16>,
    rtcp_packets: u64,
    last_sr_ntp: Option<u64>,
}

impl RtcpReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one inbound frame. Malformed packets are counted as bytes
    /// only; media is lossy and never worth terminating a publisher over.
    pub fn on_frame(&mut self, stream_type: StreamType, payload: &[u8]) {
        match stream_type {
            StreamType::Rtp => self.on_rtp(payload),
            StreamType::Rtcp => self.on_rtcp(payload),
        }
    }

    fn on_rtp(&mut self, payload: &[u8]) {
        self.rtp_bytes += payload.len() as u64;
        if payload.len() < RTP_HEADER_LEN || payload[0] >> 6 != RTP_VERSION {
            return;
        }
        self.rtp_packets += 1;

        let seq = u16::from_be_bytes([payload[2], payload[3]]);
        if let Some(max) = self.max_seq {
            let gap = seq.wrapping_sub(max.wrapping_add(1));
            // Forward gaps below half the sequence space count as loss;
            // anything else is reordering or a restart.
            if gap != 0 && gap < u16::MAX / 2 {
                self.lost += u64::from(gap);
            }
        }
        self.max_seq = Some(seq);
    }

    fn on_rtcp(&mut self, payload: &[u8]) {
        if payload.len() < 8 || payload[0] >> 6 != RTP_VERSION {
            return;
        }
        self.rtcp_packets += 1;

        if payload[1] == RTCP_PACKET_TYPE_SR && payload.len() >= 16 {
            let ntp = u64::from_be_bytes(payload[8..16].try_into().unwrap());
            self.last_sr_ntp = Some(ntp);
        }
    }

    pub fn rtp_packets(&self) -> u64 {
        self.rtp_packets
    }

    pub fn rtp_bytes(&self) -> u64 {
        self.rtp_bytes
    }

    pub fn packets_lost(&self) -> u64 {
        self.lost
    }

    pub fn last_sender_report_ntp(&self) -> Option<u64> {
        self.last_sr_ntp
    }
}
