//! Coordinator event types
//!
//! Every operation that touches coordinator-owned state travels as one of
//! these events. Queries and refusable mutations carry a `oneshot` reply
//! channel; committed transitions carry a completion signal the session
//! blocks on. Frame events carry `Bytes` payloads, so queuing a frame never
//! copies media data.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::protocol::transport::StreamProtocol;
use crate::sdp::SessionDescription;

use super::error::ControlError;

/// Opaque handle of a connected client session.
pub type ClientId = u64;

/// Index of a configured source worker.
pub type SourceId = usize;

/// Reply channel for operations the coordinator may refuse.
pub type ControlReply = oneshot::Sender<Result<(), ControlError>>;

/// Completion signal for committed transitions.
pub type DoneSignal = oneshot::Sender<()>;

/// Which of the two media streams a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Rtp,
    Rtcp,
}

/// Per-track peer port pair. For UDP clients these are remote UDP ports;
/// for interleaved TCP clients they hold the negotiated channel numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPorts {
    pub rtp: u16,
    pub rtcp: u16,
}

impl TrackPorts {
    pub fn port(&self, stream_type: StreamType) -> u16 {
        match stream_type {
            StreamType::Rtp => self.rtp,
            StreamType::Rtcp => self.rtcp,
        }
    }
}

/// An event consumed by the coordinator loop.
pub enum Event {
    /// A new RTSP control connection was accepted.
    ClientNew { conn: TcpStream, addr: SocketAddr },

    /// A session is going away. Idempotent.
    ClientClose { client: ClientId, done: DoneSignal },

    /// DESCRIBE: the publisher's SDP, or `None` (session answers 404).
    Describe {
        path: String,
        reply: oneshot::Sender<Option<Bytes>>,
    },

    /// ANNOUNCE: claim a path for publishing.
    Announce {
        client: ClientId,
        path: String,
        sdp_text: Bytes,
        sdp: SessionDescription,
        reply: ControlReply,
    },

    /// SETUP of one receiving track.
    SetupPlay {
        client: ClientId,
        path: String,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
        reply: ControlReply,
    },

    /// SETUP of one publishing track (path was claimed by Announce).
    SetupRecord {
        client: ClientId,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
        reply: ControlReply,
    },

    /// PLAY precondition check; permits the session to send its 200.
    Play1 { client: ClientId, reply: ControlReply },

    /// PLAY commitment after the 200 went out.
    Play2 { client: ClientId, done: DoneSignal },

    /// Leave the Play state (PAUSE or teardown).
    PlayStop { client: ClientId, done: DoneSignal },

    /// RECORD commitment.
    Record { client: ClientId, done: DoneSignal },

    /// Leave the Record state; receivers on the path are scheduled to close.
    RecordStop { client: ClientId, done: DoneSignal },

    /// Datagram received on one of the UDP listeners.
    FrameUdp {
        addr: SocketAddr,
        stream_type: StreamType,
        payload: Bytes,
    },

    /// Interleaved frame read from a publishing TCP session.
    FrameTcp {
        path: String,
        track_id: usize,
        stream_type: StreamType,
        payload: Bytes,
    },

    /// A source worker finished negotiating with its upstream.
    SourceReady {
        source: SourceId,
        sdp_text: Bytes,
        sdp: SessionDescription,
    },

    /// A source worker lost its upstream.
    SourceNotReady { source: SourceId },

    /// Frame pulled from an upstream by a source worker.
    SourceFrame {
        source: SourceId,
        track_id: usize,
        stream_type: StreamType,
        payload: Bytes,
    },

    /// Exit the event loop and enter draining mode.
    Terminate,
}

impl Event {
    /// Draining-mode disposition: resolve every embedded channel so that no
    /// session task stays blocked on a reply that will never come.
    pub(crate) fn reject_terminated(self) {
        match self {
            Event::ClientClose { done, .. }
            | Event::Play2 { done, .. }
            | Event::PlayStop { done, .. }
            | Event::Record { done, .. }
            | Event::RecordStop { done, .. } => {
                let _ = done.send(());
            }
            Event::Describe { reply, .. } => {
                let _ = reply.send(None);
            }
            Event::Announce { reply, .. }
            | Event::SetupPlay { reply, .. }
            | Event::SetupRecord { reply, .. }
            | Event::Play1 { reply, .. } => {
                let _ = reply.send(Err(ControlError::Terminated));
            }
            Event::ClientNew { .. }
            | Event::FrameUdp { .. }
            | Event::FrameTcp { .. }
            | Event::SourceReady { .. }
            | Event::SourceNotReady { .. }
            | Event::SourceFrame { .. }
            | Event::Terminate => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_ports_select_by_stream_type() {
        let t = TrackPorts { rtp: 35000, rtcp: 35001 };
        assert_eq!(t.port(StreamType::Rtp), 35000);
        assert_eq!(t.port(StreamType::Rtcp), 35001);
    }

    #[tokio::test]
    async fn test_reject_terminated_resolves_channels() {
        let (reply, rx) = oneshot::channel();
        Event::Play1 { client: 1, reply }.reject_terminated();
        assert_eq!(rx.await.unwrap(), Err(ControlError::Terminated));

        let (done, rx) = oneshot::channel();
        Event::ClientClose { client: 1, done }.reject_terminated();
        assert!(rx.await.is_ok());

        let (reply, rx) = oneshot::channel();
        Event::Describe {
            path: "cam".into(),
            reply,
        }
        .reject_terminated();
        assert_eq!(rx.await.unwrap(), None);
    }
}
