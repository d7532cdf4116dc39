//! The coordinator event loop
//!
//! One task, one inbound channel, no locks: every event is processed to
//! completion before the next one is read, so the path→publisher map, the
//! client set and the gauges can only ever be observed in a consistent
//! state. Frame events are fanned out from here — UDP receivers through the
//! listener send queues, TCP receivers through their latest-wins slots.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::protocol::transport::StreamProtocol;
use crate::protocol::InterleavedFrame;
use crate::rtcp::RtcpReceiver;
use crate::server::udp::Datagram;
use crate::session::outbound::frame_slot;
use crate::session::state::ClientState;
use crate::session::ClientSession;
use crate::stats::ServerMetrics;

use super::error::ControlError;
use super::event::{ClientId, Event, SourceId, StreamType, TrackPorts};
use super::publisher::{ClientEntry, Publisher, SourceEntry};

/// The single-writer state machine owning all cross-session state.
pub struct Coordinator {
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,

    clients: HashMap<ClientId, ClientEntry>,
    next_client_id: ClientId,
    publishers: HashMap<String, Publisher>,
    sources: Vec<SourceEntry>,

    /// Publishers currently ready (clients in Record + ready sources).
    publisher_count: usize,
    /// Clients currently in Play.
    receiver_count: usize,

    rtp_out: mpsc::Sender<Datagram>,
    rtcp_out: mpsc::Sender<Datagram>,
    /// Server UDP port pair, advertised by sessions in SETUP answers.
    udp_ports: (u16, u16),

    /// Accept/recv/send loops, aborted during draining.
    listener_tasks: Vec<JoinHandle<()>>,

    metrics: Arc<ServerMetrics>,
}

impl Coordinator {
    pub fn new(
        rx: mpsc::Receiver<Event>,
        tx: mpsc::Sender<Event>,
        rtp_out: mpsc::Sender<Datagram>,
        rtcp_out: mpsc::Sender<Datagram>,
        udp_ports: (u16, u16),
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Coordinator {
            rx,
            tx,
            clients: HashMap::new(),
            next_client_id: 1,
            publishers: HashMap::new(),
            sources: Vec::new(),
            publisher_count: 0,
            receiver_count: 0,
            rtp_out,
            rtcp_out,
            udp_ports,
            listener_tasks: Vec::new(),
            metrics,
        }
    }

    /// Register a configured source worker and claim its path in the
    /// publisher map. Called during server wiring, before the loop runs.
    pub fn register_source(&mut self, path: String, shutdown: Arc<Notify>) -> SourceId {
        let id = self.sources.len();
        self.publishers.insert(path.clone(), Publisher::Source(id));
        self.sources.push(SourceEntry::new(path, shutdown));
        id
    }

    /// Register a listener task (accept loop, UDP recv/send loop) to be
    /// aborted during draining.
    pub fn register_listener_task(&mut self, task: JoinHandle<()>) {
        self.listener_tasks.push(task);
    }

    /// Drive the loop until Terminate, then drain.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let flow = self.handle_event(event);
            self.sync_metrics();
            if flow.is_break() {
                break;
            }
        }
        self.drain().await;
    }

    fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::ClientNew { conn, addr } => self.on_client_new(conn, addr),

            Event::ClientClose { client, done } => {
                self.on_client_close(client);
                let _ = done.send(());
            }

            Event::Describe { path, reply } => {
                let sdp = self
                    .publishers
                    .get(&path)
                    .copied()
                    .filter(|p| self.publisher_is_ready(*p))
                    .and_then(|p| self.publisher_sdp_text(p));
                let _ = reply.send(sdp);
            }

            Event::Announce {
                client,
                path,
                sdp_text,
                sdp,
                reply,
            } => {
                let _ = reply.send(self.on_announce(client, path, sdp_text, sdp));
            }

            Event::SetupPlay {
                client,
                path,
                protocol,
                rtp_port,
                rtcp_port,
                reply,
            } => {
                let _ = reply.send(self.on_setup_play(client, path, protocol, rtp_port, rtcp_port));
            }

            Event::SetupRecord {
                client,
                protocol,
                rtp_port,
                rtcp_port,
                reply,
            } => {
                let _ = reply.send(self.on_setup_record(client, protocol, rtp_port, rtcp_port));
            }

            Event::Play1 { client, reply } => {
                let _ = reply.send(self.on_play1(client));
            }

            Event::Play2 { client, done } => {
                self.on_play2(client);
                let _ = done.send(());
            }

            Event::PlayStop { client, done } => {
                self.on_play_stop(client);
                let _ = done.send(());
            }

            Event::Record { client, done } => {
                self.on_record(client);
                let _ = done.send(());
            }

            Event::RecordStop { client, done } => {
                self.on_record_stop(client);
                let _ = done.send(());
            }

            Event::FrameUdp {
                addr,
                stream_type,
                payload,
            } => self.on_frame_udp(addr, stream_type, payload),

            Event::FrameTcp {
                path,
                track_id,
                stream_type,
                payload,
            } => self.forward_frame(&path, track_id, stream_type, payload),

            Event::SourceReady {
                source,
                sdp_text,
                sdp,
            } => self.on_source_ready(source, sdp_text, sdp),

            Event::SourceNotReady { source } => self.on_source_not_ready(source),

            Event::SourceFrame {
                source,
                track_id,
                stream_type,
                payload,
            } => {
                if let Some(path) = self.sources.get(source).map(|s| s.path.clone()) {
                    self.forward_frame(&path, track_id, stream_type, payload);
                }
            }

            Event::Terminate => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn on_client_new(&mut self, conn: tokio::net::TcpStream, addr: SocketAddr) {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let shutdown = Arc::new(Notify::new());
        let (frames_tx, frames_rx) = frame_slot();
        let task = ClientSession::spawn(
            id,
            conn,
            addr,
            self.udp_ports,
            self.tx.clone(),
            frames_rx,
            shutdown.clone(),
        );
        self.clients
            .insert(id, ClientEntry::new(addr, frames_tx, shutdown, task));

        tracing::info!("{} client {} connected ({})", self.prefix(), id, addr);
    }

    fn on_client_close(&mut self, client: ClientId) {
        // Idempotent: a session may close while a scheduled close is in flight.
        let Some(entry) = self.clients.remove(&client) else {
            return;
        };

        if let Some(path) = &entry.path {
            if self.publishers.get(path) == Some(&Publisher::Client(client)) {
                self.publishers.remove(path);
            }
        }

        tracing::info!("{} client {} disconnected", self.prefix(), client);
    }

    fn on_announce(
        &mut self,
        client: ClientId,
        path: String,
        sdp_text: Bytes,
        sdp: crate::sdp::SessionDescription,
    ) -> Result<(), ControlError> {
        if self.publishers.contains_key(&path) {
            return Err(ControlError::AlreadyPublishing(path));
        }
        let entry = self
            .clients
            .get_mut(&client)
            .ok_or(ControlError::InvalidState)?;

        entry.path = Some(path.clone());
        entry.state = ClientState::Announce;
        entry.sdp_text = Some(sdp_text);
        entry.sdp = Some(sdp);
        self.publishers.insert(path, Publisher::Client(client));
        Ok(())
    }

    fn on_setup_play(
        &mut self,
        client: ClientId,
        path: String,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
    ) -> Result<(), ControlError> {
        let publisher = self
            .publishers
            .get(&path)
            .copied()
            .filter(|p| self.publisher_is_ready(*p))
            .ok_or_else(|| ControlError::NoOneStreaming(path.clone()))?;
        let media_count = self
            .publisher_media_count(publisher)
            .ok_or_else(|| ControlError::NoOneStreaming(path.clone()))?;

        let entry = self
            .clients
            .get_mut(&client)
            .ok_or(ControlError::InvalidState)?;
        if !entry.state.can_setup_play() {
            return Err(ControlError::InvalidState);
        }
        if entry.tracks.len() >= media_count {
            return Err(ControlError::TracksAlreadySetup);
        }

        entry.path = Some(path);
        entry.protocol = Some(protocol);
        entry.tracks.push(TrackPorts {
            rtp: rtp_port,
            rtcp: rtcp_port,
        });
        entry.state = ClientState::PrePlay;
        Ok(())
    }

    fn on_setup_record(
        &mut self,
        client: ClientId,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
    ) -> Result<(), ControlError> {
        let entry = self
            .clients
            .get_mut(&client)
            .ok_or(ControlError::InvalidState)?;
        if !entry.state.can_setup_record() {
            return Err(ControlError::InvalidState);
        }
        if entry.tracks.len() >= entry.announced_track_count() {
            return Err(ControlError::TracksAlreadySetup);
        }

        entry.protocol = Some(protocol);
        entry.tracks.push(TrackPorts {
            rtp: rtp_port,
            rtcp: rtcp_port,
        });
        entry.state = ClientState::PreRecord;
        Ok(())
    }

    fn on_play1(&self, client: ClientId) -> Result<(), ControlError> {
        let entry = self.clients.get(&client).ok_or(ControlError::InvalidState)?;
        let path = entry.path.clone().ok_or(ControlError::InvalidState)?;

        let publisher = self
            .publishers
            .get(&path)
            .copied()
            .filter(|p| self.publisher_is_ready(*p))
            .ok_or_else(|| ControlError::NoOneStreaming(path.clone()))?;
        let media_count = self
            .publisher_media_count(publisher)
            .ok_or_else(|| ControlError::NoOneStreaming(path))?;

        if entry.tracks.len() != media_count {
            return Err(ControlError::TracksNotSetup);
        }
        Ok(())
    }

    fn on_play2(&mut self, client: ClientId) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        entry.state = ClientState::Play;
        self.receiver_count += 1;

        let (path, tracks, protocol) = (
            entry.path.clone().unwrap_or_default(),
            entry.tracks.len(),
            entry.protocol,
        );
        tracing::info!(
            "{} client {} is receiving on path '{}' ({} tracks via {})",
            self.prefix(),
            client,
            path,
            tracks,
            protocol.map(|p| p.to_string()).unwrap_or_default(),
        );
    }

    fn on_play_stop(&mut self, client: ClientId) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        if entry.state != ClientState::Play {
            return;
        }
        entry.state = ClientState::PrePlay;
        self.receiver_count -= 1;

        tracing::info!("{} client {} stopped receiving", self.prefix(), client);
    }

    fn on_record(&mut self, client: ClientId) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        entry.state = ClientState::Record;
        entry.rtcp_receivers = entry.tracks.iter().map(|_| RtcpReceiver::new()).collect();
        self.publisher_count += 1;

        let (path, tracks, protocol) = (
            entry.path.clone().unwrap_or_default(),
            entry.tracks.len(),
            entry.protocol,
        );
        tracing::info!(
            "{} client {} is publishing on path '{}' ({} tracks via {})",
            self.prefix(),
            client,
            path,
            tracks,
            protocol.map(|p| p.to_string()).unwrap_or_default(),
        );
    }

    fn on_record_stop(&mut self, client: ClientId) {
        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        if entry.state != ClientState::Record {
            return;
        }
        entry.state = ClientState::PreRecord;
        self.publisher_count -= 1;
        let path = entry.path.clone();

        // The stream is ending; everyone watching it is scheduled to close.
        for (&other, oc) in &self.clients {
            if other != client && oc.path == path {
                oc.shutdown.notify_one();
            }
        }

        tracing::info!("{} client {} stopped publishing", self.prefix(), client);
    }

    fn on_frame_udp(&mut self, addr: SocketAddr, stream_type: StreamType, payload: Bytes) {
        // Frames from unknown addresses are dropped; UDP is open to the world.
        let Some((client, track_id)) = self.find_publisher(addr, stream_type) else {
            return;
        };

        let Some(entry) = self.clients.get_mut(&client) else {
            return;
        };
        if let Some(receiver) = entry.rtcp_receivers.get_mut(track_id) {
            receiver.on_frame(stream_type, &payload);
        }
        if let Some(path) = entry.path.clone() {
            self.forward_frame(&path, track_id, stream_type, payload);
        }
    }

    fn on_source_ready(
        &mut self,
        source: SourceId,
        sdp_text: Bytes,
        sdp: crate::sdp::SessionDescription,
    ) {
        let Some(entry) = self.sources.get_mut(source) else {
            return;
        };
        entry.ready = true;
        entry.sdp_text = Some(sdp_text);
        entry.sdp = Some(sdp);
        self.publisher_count += 1;

        let path = entry.path.clone();
        tracing::info!("{} source on path '{}' is ready", self.prefix(), path);
    }

    fn on_source_not_ready(&mut self, source: SourceId) {
        let Some(entry) = self.sources.get_mut(source) else {
            return;
        };
        if !entry.ready {
            return;
        }
        entry.ready = false;
        self.publisher_count -= 1;
        let path = entry.path.clone();

        for oc in self.clients.values() {
            if oc.path.as_deref() == Some(path.as_str()) {
                oc.shutdown.notify_one();
            }
        }

        tracing::info!("{} source on path '{}' is not ready", self.prefix(), path);
    }

    /// Identify the publishing client behind a UDP datagram by its source
    /// address: remote IP plus the per-track port advertised in SETUP.
    /// Linear scan; publishers are few.
    fn find_publisher(
        &self,
        addr: SocketAddr,
        stream_type: StreamType,
    ) -> Option<(ClientId, usize)> {
        for publisher in self.publishers.values() {
            let Publisher::Client(id) = *publisher else {
                continue;
            };
            let Some(entry) = self.clients.get(&id) else {
                continue;
            };
            if entry.protocol != Some(StreamProtocol::Udp)
                || entry.state != ClientState::Record
                || entry.addr.ip() != addr.ip()
            {
                continue;
            }
            for (track_id, track) in entry.tracks.iter().enumerate() {
                if track.port(stream_type) == addr.port() {
                    return Some((id, track_id));
                }
            }
        }
        None
    }

    /// Fan a frame out to every client playing the path.
    fn forward_frame(&self, path: &str, track_id: usize, stream_type: StreamType, payload: Bytes) {
        for entry in self.clients.values() {
            if entry.path.as_deref() != Some(path) || entry.state != ClientState::Play {
                continue;
            }
            let Some(track) = entry.tracks.get(track_id) else {
                continue;
            };

            match entry.protocol {
                Some(StreamProtocol::Udp) => {
                    let queue = match stream_type {
                        StreamType::Rtp => &self.rtp_out,
                        StreamType::Rtcp => &self.rtcp_out,
                    };
                    let datagram = Datagram {
                        dest: SocketAddr::new(entry.addr.ip(), track.port(stream_type)),
                        payload: payload.clone(),
                    };
                    if queue.try_send(datagram).is_err() {
                        tracing::trace!(path, track_id, "udp send queue full, frame dropped");
                    }
                }
                Some(StreamProtocol::Tcp) => {
                    let channel = track.port(stream_type) as u8;
                    entry
                        .frames
                        .offer(InterleavedFrame::new(channel, payload.clone()));
                }
                None => {}
            }
        }
        self.metrics.add_frames_forwarded(1);
    }

    fn publisher_is_ready(&self, publisher: Publisher) -> bool {
        match publisher {
            Publisher::Client(id) => self
                .clients
                .get(&id)
                .map(|c| c.state == ClientState::Record)
                .unwrap_or(false),
            Publisher::Source(id) => self.sources.get(id).map(|s| s.ready).unwrap_or(false),
        }
    }

    fn publisher_sdp_text(&self, publisher: Publisher) -> Option<Bytes> {
        match publisher {
            Publisher::Client(id) => self.clients.get(&id)?.sdp_text.clone(),
            Publisher::Source(id) => self.sources.get(id)?.sdp_text.clone(),
        }
    }

    fn publisher_media_count(&self, publisher: Publisher) -> Option<usize> {
        let sdp = match publisher {
            Publisher::Client(id) => self.clients.get(&id)?.sdp.as_ref(),
            Publisher::Source(id) => self.sources.get(id)?.sdp.as_ref(),
        };
        sdp.map(|s| s.media_descriptions.len())
    }

    /// Counter prefix carried by every coordinator log line.
    fn prefix(&self) -> String {
        format!(
            "[{}/{}/{}]",
            self.clients.len(),
            self.publisher_count,
            self.receiver_count
        )
    }

    fn sync_metrics(&self) {
        self.metrics
            .set_gauges(self.clients.len(), self.publisher_count, self.receiver_count);
    }

    /// Draining mode: answer whatever is still in flight so no session task
    /// wedges on its reply channel, stop the listeners and sources, then
    /// close every client and wait for its task to finish.
    async fn drain(self) {
        tracing::info!("{} terminating", self.prefix());

        let Coordinator {
            rx,
            clients,
            sources,
            listener_tasks,
            ..
        } = self;

        tokio::spawn(async move {
            let mut rx = rx;
            while let Some(event) = rx.recv().await {
                event.reject_terminated();
            }
        });

        for task in &listener_tasks {
            task.abort();
        }
        for source in &sources {
            source.shutdown.notify_one();
        }

        let mut session_tasks = Vec::with_capacity(clients.len());
        for (_, entry) in clients {
            entry.shutdown.notify_one();
            session_tasks.push(entry.task);
        }
        for task in session_tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use crate::sdp::SessionDescription;
    use crate::session::outbound::FrameReceiver;

    use super::*;

    const SDP_TWO_TRACKS: &[u8] =
        b"v=0\r\nm=video 0 RTP/AVP 96\r\nm=audio 0 RTP/AVP 97\r\n";
    const SDP_ONE_TRACK: &[u8] = b"v=0\r\nm=video 0 RTP/AVP 96\r\n";

    fn new_coordinator() -> (
        Coordinator,
        mpsc::Receiver<Datagram>,
        mpsc::Receiver<Datagram>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let (rtp_tx, rtp_rx) = mpsc::channel(64);
        let (rtcp_tx, rtcp_rx) = mpsc::channel(64);
        let coordinator = Coordinator::new(
            rx,
            tx,
            rtp_tx,
            rtcp_tx,
            (8000, 8001),
            Arc::new(ServerMetrics::default()),
        );
        (coordinator, rtp_rx, rtcp_rx)
    }

    fn add_client(
        c: &mut Coordinator,
        addr: &str,
    ) -> (ClientId, FrameReceiver, Arc<Notify>) {
        let id = c.next_client_id;
        c.next_client_id += 1;
        let (frames_tx, frames_rx) = frame_slot();
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(async {});
        c.clients.insert(
            id,
            ClientEntry::new(addr.parse().unwrap(), frames_tx, shutdown.clone(), task),
        );
        (id, frames_rx, shutdown)
    }

    fn announce(
        c: &mut Coordinator,
        client: ClientId,
        path: &str,
        sdp_raw: &'static [u8],
    ) -> Result<(), ControlError> {
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::Announce {
            client,
            path: path.into(),
            sdp_text: Bytes::from_static(sdp_raw),
            sdp: SessionDescription::parse(sdp_raw).unwrap(),
            reply,
        });
        rx.try_recv().unwrap()
    }

    fn setup_record(
        c: &mut Coordinator,
        client: ClientId,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
    ) -> Result<(), ControlError> {
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::SetupRecord {
            client,
            protocol,
            rtp_port,
            rtcp_port,
            reply,
        });
        rx.try_recv().unwrap()
    }

    fn setup_play(
        c: &mut Coordinator,
        client: ClientId,
        path: &str,
        protocol: StreamProtocol,
        rtp_port: u16,
        rtcp_port: u16,
    ) -> Result<(), ControlError> {
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::SetupPlay {
            client,
            path: path.into(),
            protocol,
            rtp_port,
            rtcp_port,
            reply,
        });
        rx.try_recv().unwrap()
    }

    fn signal(c: &mut Coordinator, make: impl FnOnce(oneshot::Sender<()>) -> Event) {
        let (done, mut rx) = oneshot::channel();
        c.handle_event(make(done));
        rx.try_recv().unwrap();
    }

    fn describe(c: &mut Coordinator, path: &str) -> Option<Bytes> {
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::Describe {
            path: path.into(),
            reply,
        });
        rx.try_recv().unwrap()
    }

    /// Announce → setup both tracks → record, over interleaved TCP.
    fn publish_tcp(c: &mut Coordinator, client: ClientId, path: &str) {
        announce(c, client, path, SDP_TWO_TRACKS).unwrap();
        setup_record(c, client, StreamProtocol::Tcp, 0, 1).unwrap();
        setup_record(c, client, StreamProtocol::Tcp, 2, 3).unwrap();
        signal(c, |done| Event::Record { client, done });
    }

    #[tokio::test]
    async fn test_duplicate_publisher_rejected() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");

        announce(&mut c, a, "x", SDP_ONE_TRACK).unwrap();
        let err = announce(&mut c, b, "x", SDP_ONE_TRACK).unwrap_err();
        assert_eq!(err, ControlError::AlreadyPublishing("x".into()));
        assert!(err.to_string().contains("already publishing"));
    }

    #[tokio::test]
    async fn test_describe_requires_ready_publisher() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");

        assert_eq!(describe(&mut c, "cam"), None);

        announce(&mut c, a, "cam", SDP_ONE_TRACK).unwrap();
        // Announced but not recording yet: still not ready.
        assert_eq!(describe(&mut c, "cam"), None);

        setup_record(&mut c, a, StreamProtocol::Tcp, 0, 1).unwrap();
        signal(&mut c, |done| Event::Record { client: a, done });
        assert_eq!(describe(&mut c, "cam"), Some(Bytes::from_static(SDP_ONE_TRACK)));
    }

    #[tokio::test]
    async fn test_setup_play_requires_ready_publisher() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");

        let err = setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 0, 1).unwrap_err();
        assert_eq!(err, ControlError::NoOneStreaming("cam".into()));
    }

    #[tokio::test]
    async fn test_track_count_is_capped_by_sdp() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");
        publish_tcp(&mut c, a, "cam");

        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 0, 1).unwrap();
        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 2, 3).unwrap();
        let err = setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 4, 5).unwrap_err();
        assert_eq!(err, ControlError::TracksAlreadySetup);
    }

    #[tokio::test]
    async fn test_play_requires_all_tracks_setup() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");
        publish_tcp(&mut c, a, "cam");

        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 0, 1).unwrap();
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::Play1 { client: b, reply });
        assert_eq!(rx.try_recv().unwrap(), Err(ControlError::TracksNotSetup));

        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 2, 3).unwrap();
        let (reply, mut rx) = oneshot::channel();
        c.handle_event(Event::Play1 { client: b, reply });
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_receiver_count_tracks_play_state() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");
        publish_tcp(&mut c, a, "cam");
        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 0, 1).unwrap();
        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 2, 3).unwrap();

        signal(&mut c, |done| Event::Play2 { client: b, done });
        assert_eq!(c.receiver_count, 1);
        assert_eq!(c.clients[&b].state, ClientState::Play);

        signal(&mut c, |done| Event::PlayStop { client: b, done });
        assert_eq!(c.receiver_count, 0);
        assert_eq!(c.clients[&b].state, ClientState::PrePlay);
    }

    #[tokio::test]
    async fn test_record_stop_schedules_close_of_receivers() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, _, b_shutdown) = add_client(&mut c, "10.0.0.2:40001");
        publish_tcp(&mut c, a, "y");
        setup_play(&mut c, b, "y", StreamProtocol::Tcp, 0, 1).unwrap();
        setup_play(&mut c, b, "y", StreamProtocol::Tcp, 2, 3).unwrap();
        signal(&mut c, |done| Event::Play2 { client: b, done });

        assert_eq!(c.publisher_count, 1);
        signal(&mut c, |done| Event::RecordStop { client: a, done });
        assert_eq!(c.publisher_count, 0);

        // The receiver was scheduled for close (its shutdown holds a permit).
        tokio::time::timeout(std::time::Duration::from_millis(50), b_shutdown.notified())
            .await
            .expect("receiver was not scheduled for close");
    }

    #[tokio::test]
    async fn test_client_close_removes_publisher_entry() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        publish_tcp(&mut c, a, "y");
        signal(&mut c, |done| Event::RecordStop { client: a, done });
        signal(&mut c, |done| Event::ClientClose { client: a, done });

        assert!(!c.publishers.contains_key("y"));
        assert!(c.clients.is_empty());
        // Close is idempotent.
        signal(&mut c, |done| Event::ClientClose { client: a, done });
    }

    #[tokio::test]
    async fn test_path_is_free_for_announce_after_publisher_leaves() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        publish_tcp(&mut c, a, "y");
        signal(&mut c, |done| Event::RecordStop { client: a, done });
        signal(&mut c, |done| Event::ClientClose { client: a, done });

        let (b, _, _) = add_client(&mut c, "10.0.0.2:40001");
        announce(&mut c, b, "y", SDP_ONE_TRACK).unwrap();
    }

    #[tokio::test]
    async fn test_udp_demux_routes_by_source_address() {
        let (mut c, mut rtp_rx, _rtcp) = new_coordinator();

        // Two UDP publishers on distinct paths from distinct IPs.
        let (pub1, _, _) = add_client(&mut c, "10.0.0.1:50000");
        announce(&mut c, pub1, "one", SDP_ONE_TRACK).unwrap();
        setup_record(&mut c, pub1, StreamProtocol::Udp, 50000, 50001).unwrap();
        signal(&mut c, |done| Event::Record { client: pub1, done });

        let (pub2, _, _) = add_client(&mut c, "10.0.0.2:50000");
        announce(&mut c, pub2, "two", SDP_ONE_TRACK).unwrap();
        setup_record(&mut c, pub2, StreamProtocol::Udp, 50000, 50001).unwrap();
        signal(&mut c, |done| Event::Record { client: pub2, done });

        // One UDP receiver per path.
        let (rcv1, _, _) = add_client(&mut c, "10.0.1.1:9000");
        setup_play(&mut c, rcv1, "one", StreamProtocol::Udp, 60000, 60001).unwrap();
        signal(&mut c, |done| Event::Play2 { client: rcv1, done });

        let (rcv2, _, _) = add_client(&mut c, "10.0.1.2:9000");
        setup_play(&mut c, rcv2, "two", StreamProtocol::Udp, 61000, 61001).unwrap();
        signal(&mut c, |done| Event::Play2 { client: rcv2, done });

        // A frame from publisher 1's address reaches only path "one".
        c.handle_event(Event::FrameUdp {
            addr: "10.0.0.1:50000".parse().unwrap(),
            stream_type: StreamType::Rtp,
            payload: Bytes::from_static(b"frame-one"),
        });

        let datagram = rtp_rx.try_recv().unwrap();
        assert_eq!(datagram.dest, "10.0.1.1:60000".parse().unwrap());
        assert_eq!(datagram.payload.as_ref(), b"frame-one");
        assert!(rtp_rx.try_recv().is_err(), "frame leaked to another path");

        // Frames from unknown addresses are dropped.
        c.handle_event(Event::FrameUdp {
            addr: "10.9.9.9:50000".parse().unwrap(),
            stream_type: StreamType::Rtp,
            payload: Bytes::from_static(b"stray"),
        });
        assert!(rtp_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tcp_forwarding_preserves_payload_and_channel() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let (a, _, _) = add_client(&mut c, "10.0.0.1:40000");
        let (b, mut b_frames, _) = add_client(&mut c, "10.0.0.2:40001");
        publish_tcp(&mut c, a, "cam");
        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 0, 1).unwrap();
        setup_play(&mut c, b, "cam", StreamProtocol::Tcp, 2, 3).unwrap();
        signal(&mut c, |done| Event::Play2 { client: b, done });

        c.handle_event(Event::FrameTcp {
            path: "cam".into(),
            track_id: 1,
            stream_type: StreamType::Rtp,
            payload: Bytes::from_static(b"\x80\x60payload"),
        });

        let frame = b_frames.next().await.unwrap();
        assert_eq!(frame.channel, 2);
        assert_eq!(frame.payload.as_ref(), b"\x80\x60payload");
    }

    #[tokio::test]
    async fn test_source_lifecycle_and_cascade() {
        let (mut c, _rtp, _rtcp) = new_coordinator();
        let shutdown = Arc::new(Notify::new());
        let source = c.register_source("s".into(), shutdown);

        // Configured but not ready: DESCRIBE is empty, SETUP refused.
        assert_eq!(describe(&mut c, "s"), None);

        c.handle_event(Event::SourceReady {
            source,
            sdp_text: Bytes::from_static(SDP_ONE_TRACK),
            sdp: SessionDescription::parse(SDP_ONE_TRACK).unwrap(),
        });
        assert_eq!(c.publisher_count, 1);
        assert_eq!(describe(&mut c, "s"), Some(Bytes::from_static(SDP_ONE_TRACK)));

        // A receiver joins, then the source drops: the receiver is closed.
        let (b, _, b_shutdown) = add_client(&mut c, "10.0.1.1:9000");
        setup_play(&mut c, b, "s", StreamProtocol::Udp, 60000, 60001).unwrap();
        signal(&mut c, |done| Event::Play2 { client: b, done });

        c.handle_event(Event::SourceNotReady { source });
        assert_eq!(c.publisher_count, 0);
        assert_eq!(describe(&mut c, "s"), None);
        tokio::time::timeout(std::time::Duration::from_millis(50), b_shutdown.notified())
            .await
            .expect("receiver was not scheduled for close");
    }

    #[tokio::test]
    async fn test_terminate_drains_in_flight_events() {
        let (tx, rx) = mpsc::channel(64);
        let (rtp_tx, _rtp_rx) = mpsc::channel(64);
        let (rtcp_tx, _rtcp_rx) = mpsc::channel(64);
        let coordinator = Coordinator::new(
            rx,
            tx.clone(),
            rtp_tx,
            rtcp_tx,
            (8000, 8001),
            Arc::new(ServerMetrics::default()),
        );

        let handle = tokio::spawn(coordinator.run());
        tx.send(Event::Terminate).await.unwrap();

        // Events sent after Terminate still get a (refusal) reply.
        let (reply, rx_reply) = oneshot::channel();
        tx.send(Event::Play1 { client: 1, reply }).await.unwrap();
        assert_eq!(rx_reply.await.unwrap(), Err(ControlError::Terminated));

        handle.await.unwrap();
    }
}
