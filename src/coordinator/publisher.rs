//! Publisher identity and coordinator-owned entries
//!
//! A path's publisher is either a connected client session that claimed the
//! path with ANNOUNCE, or one of the configured source workers. Both expose
//! the same three capabilities — readiness, SDP text, parsed SDP — which the
//! coordinator resolves against its own maps (the data lives in the entries,
//! never behind shared references).

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::protocol::transport::StreamProtocol;
use crate::rtcp::RtcpReceiver;
use crate::sdp::SessionDescription;
use crate::session::outbound::FrameSender;
use crate::session::state::ClientState;

use super::event::{ClientId, SourceId, TrackPorts};

/// Tagged publisher variant stored in the path map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publisher {
    /// A client session that announced the path.
    Client(ClientId),
    /// A configured source worker bound to the path.
    Source(SourceId),
}

/// Coordinator-owned state of one connected client session.
pub(crate) struct ClientEntry {
    pub(crate) addr: SocketAddr,
    pub(crate) path: Option<String>,
    pub(crate) state: ClientState,
    pub(crate) protocol: Option<StreamProtocol>,
    pub(crate) tracks: Vec<TrackPorts>,
    /// SDP the client announced (publishers only).
    pub(crate) sdp_text: Option<Bytes>,
    pub(crate) sdp: Option<SessionDescription>,
    /// One per track, created when the client commits to RECORD.
    pub(crate) rtcp_receivers: Vec<RtcpReceiver>,
    /// Latest-wins slot feeding the session's writer (TCP receivers).
    pub(crate) frames: FrameSender,
    /// Signalled to schedule the session for close.
    pub(crate) shutdown: Arc<Notify>,
    /// The session task, joined during draining.
    pub(crate) task: JoinHandle<()>,
}

impl ClientEntry {
    pub(crate) fn new(
        addr: SocketAddr,
        frames: FrameSender,
        shutdown: Arc<Notify>,
        task: JoinHandle<()>,
    ) -> Self {
        ClientEntry {
            addr,
            path: None,
            state: ClientState::Initial,
            protocol: None,
            tracks: Vec::new(),
            sdp_text: None,
            sdp: None,
            rtcp_receivers: Vec::new(),
            frames,
            shutdown,
            task,
        }
    }

    /// Number of media tracks the client's announced SDP advertises.
    pub(crate) fn announced_track_count(&self) -> usize {
        self.sdp
            .as_ref()
            .map(|s| s.media_descriptions.len())
            .unwrap_or(0)
    }
}

/// Coordinator-side view of one source worker.
pub(crate) struct SourceEntry {
    pub(crate) path: String,
    pub(crate) ready: bool,
    pub(crate) sdp_text: Option<Bytes>,
    pub(crate) sdp: Option<SessionDescription>,
    /// Signalled during draining so the worker stops reconnecting.
    pub(crate) shutdown: Arc<Notify>,
}

impl SourceEntry {
    pub(crate) fn new(path: String, shutdown: Arc<Notify>) -> Self {
        SourceEntry {
            path,
            ready: false,
            sdp_text: None,
            sdp: None,
            shutdown,
        }
    }
}
