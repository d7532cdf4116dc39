//! Per-client RTSP session
//!
//! Each accepted connection gets two tasks. The reader owns the read half:
//! it peeks one byte to tell interleaved frames (`$`) from RTSP requests,
//! translates requests into coordinator events, blocks on the reply, and
//! maps it to a status line. The writer owns the write half and drains two
//! queues: a lossless response queue and the latest-wins frame slot filled
//! by the coordinator's fan-out (see [`outbound`]).
//!
//! A session dies on read error, read timeout, TEARDOWN, or a shutdown
//! notification from the coordinator (publisher loss cascades). Every exit
//! path runs the same close sequence: the state-appropriate stop event,
//! then an idempotent ClientClose.

pub mod outbound;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::coordinator::{ClientId, ControlError, Event, StreamType, TrackPorts};
use crate::error::{Error, ProtocolError};
use crate::protocol::request::SUPPORTED_METHODS;
use crate::protocol::transport::{self, StreamProtocol, TransportHeader, TransportMode};
use crate::protocol::{interleaved, path_from_uri, Request, Response, INTERLEAVED_MAGIC};
use crate::sdp::SessionDescription;

use outbound::FrameReceiver;
use state::ClientState;

/// A control connection with nothing to say within this window is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Caps keep a misbehaving peer from growing our buffers without bound.
const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_BODY_SIZE: usize = 256 * 1024;

const RESPONSE_QUEUE: usize = 16;

/// What the reader pulled off the wire.
enum Inbound {
    Request(Request, Bytes),
    Frame(u8, Bytes),
}

enum Flow {
    Continue,
    Close,
}

/// Reader-side state of one client session. The coordinator owns the
/// authoritative copy; this is the session's local mirror, updated as
/// replies come back.
pub struct ClientSession {
    id: ClientId,
    addr: SocketAddr,
    events: mpsc::Sender<Event>,
    responses: mpsc::Sender<Bytes>,
    /// Server UDP port pair advertised in SETUP answers.
    udp_ports: (u16, u16),

    state: ClientState,
    protocol: Option<StreamProtocol>,
    path: Option<String>,
    tracks: Vec<TrackPorts>,
    announced_tracks: usize,
    session_id: Option<String>,
}

impl ClientSession {
    /// Spawn the reader and writer tasks for one accepted connection.
    /// Returns the reader task; it outlives the writer and runs the close
    /// sequence, so joining it is enough during draining.
    pub fn spawn(
        id: ClientId,
        conn: TcpStream,
        addr: SocketAddr,
        udp_ports: (u16, u16),
        events: mpsc::Sender<Event>,
        frames: FrameReceiver,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (read_half, write_half) = conn.into_split();
            let (resp_tx, resp_rx) = mpsc::channel(RESPONSE_QUEUE);
            let writer = tokio::spawn(write_loop(write_half, resp_rx, frames));

            let session = ClientSession {
                id,
                addr,
                events,
                responses: resp_tx,
                udp_ports,
                state: ClientState::Initial,
                protocol: None,
                path: None,
                tracks: Vec::new(),
                announced_tracks: 0,
                session_id: None,
            };
            session.run(BufReader::new(read_half), shutdown).await;

            // run() dropped the response sender; the writer drains what is
            // queued and exits. Abort it if the peer stopped reading.
            let mut writer = writer;
            if tokio::time::timeout(Duration::from_secs(1), &mut writer)
                .await
                .is_err()
            {
                writer.abort();
            }
        })
    }

    async fn run(mut self, mut reader: BufReader<OwnedReadHalf>, shutdown: Arc<Notify>) {
        loop {
            let inbound = tokio::select! {
                _ = shutdown.notified() => break,
                result = tokio::time::timeout(READ_TIMEOUT, read_message(&mut reader)) => {
                    match result {
                        Ok(Ok(inbound)) => inbound,
                        Ok(Err(err)) => {
                            tracing::debug!(client_id = self.id, error = %err, "read ended");
                            break;
                        }
                        Err(_) => {
                            tracing::debug!(client_id = self.id, "read timeout");
                            break;
                        }
                    }
                }
            };

            let flow = match inbound {
                Inbound::Request(request, body) => self.handle_request(request, body).await,
                Inbound::Frame(channel, payload) => self.handle_frame(channel, payload).await,
            };
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) | Err(_) => break,
            }
        }

        self.close_sequence().await;
    }

    async fn handle_request(&mut self, request: Request, body: Bytes) -> Result<Flow, Error> {
        let cseq = request.cseq().unwrap_or("0").to_string();
        tracing::debug!(
            client_id = self.id,
            method = %request.method,
            uri = %request.uri,
            "request"
        );

        match request.method.as_str() {
            "OPTIONS" => {
                self.respond(
                    Response::ok()
                        .header("CSeq", &cseq)
                        .header("Public", SUPPORTED_METHODS),
                )
                .await?;
                Ok(Flow::Continue)
            }
            "DESCRIBE" => self.handle_describe(&cseq, &request).await,
            "ANNOUNCE" => self.handle_announce(&cseq, &request, body).await,
            "SETUP" => self.handle_setup(&cseq, &request).await,
            "PLAY" => self.handle_play(&cseq).await,
            "PAUSE" => self.handle_pause(&cseq).await,
            "RECORD" => self.handle_record(&cseq).await,
            "TEARDOWN" => {
                self.respond(self.with_session(Response::ok().header("CSeq", &cseq)))
                    .await?;
                Ok(Flow::Close)
            }
            method => {
                tracing::warn!(client_id = self.id, method, "unsupported method");
                self.respond(
                    Response::new(405, "Method Not Allowed")
                        .header("CSeq", &cseq)
                        .header("Allow", SUPPORTED_METHODS),
                )
                .await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_describe(&mut self, cseq: &str, request: &Request) -> Result<Flow, Error> {
        let Some(path) = path_from_uri(&request.uri) else {
            self.respond(Response::bad_request().header("CSeq", cseq))
                .await?;
            return Ok(Flow::Continue);
        };

        let (reply, rx) = oneshot::channel();
        self.send_event(Event::Describe {
            path,
            reply,
        })
        .await?;

        match rx.await.map_err(|_| Error::Terminated)? {
            Some(sdp) => {
                let base = format!("{}/", request.uri.trim_end_matches('/'));
                self.respond(
                    Response::ok()
                        .header("CSeq", cseq)
                        .header("Content-Type", "application/sdp")
                        .header("Content-Base", &base)
                        .body(sdp),
                )
                .await?;
            }
            None => {
                self.respond(Response::not_found().header("CSeq", cseq))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_announce(
        &mut self,
        cseq: &str,
        request: &Request,
        body: Bytes,
    ) -> Result<Flow, Error> {
        if self.state != ClientState::Initial {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }
        let Some(path) = path_from_uri(&request.uri) else {
            self.respond(Response::bad_request().header("CSeq", cseq))
                .await?;
            return Ok(Flow::Continue);
        };
        match request.header("Content-Type") {
            Some(ct) if ct.eq_ignore_ascii_case("application/sdp") => {}
            _ => {
                self.respond(Response::bad_request().header("CSeq", cseq))
                    .await?;
                return Ok(Flow::Continue);
            }
        }
        let sdp = match SessionDescription::parse(&body) {
            Ok(sdp) if !sdp.media_descriptions.is_empty() => sdp,
            _ => {
                self.respond(
                    Response::new(400, "invalid session description").header("CSeq", cseq),
                )
                .await?;
                return Ok(Flow::Continue);
            }
        };
        let media_count = sdp.media_descriptions.len();

        let (reply, rx) = oneshot::channel();
        self.send_event(Event::Announce {
            client: self.id,
            path: path.clone(),
            sdp_text: body,
            sdp,
            reply,
        })
        .await?;

        match rx.await.map_err(|_| Error::Terminated)? {
            Ok(()) => {
                self.path = Some(path);
                self.state = ClientState::Announce;
                self.announced_tracks = media_count;
                self.respond(Response::ok().header("CSeq", cseq)).await?;
                Ok(Flow::Continue)
            }
            Err(err) => self.refuse(cseq, &err).await,
        }
    }

    async fn handle_setup(&mut self, cseq: &str, request: &Request) -> Result<Flow, Error> {
        let Some(header) = request.header("Transport") else {
            self.respond(Response::bad_request().header("CSeq", cseq))
                .await?;
            return Ok(Flow::Continue);
        };
        let th = match TransportHeader::parse(header) {
            Ok(th) => th,
            Err(err) => {
                tracing::warn!(client_id = self.id, error = %err, "bad Transport header");
                self.respond(Response::bad_request().header("CSeq", cseq))
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        match th.mode {
            TransportMode::Play => self.handle_setup_play(cseq, request, th).await,
            TransportMode::Record => self.handle_setup_record(cseq, th).await,
        }
    }

    async fn handle_setup_play(
        &mut self,
        cseq: &str,
        request: &Request,
        th: TransportHeader,
    ) -> Result<Flow, Error> {
        if !self.state.can_setup_play() {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }
        let Some(path) = path_from_uri(&request.uri) else {
            self.respond(Response::bad_request().header("CSeq", cseq))
                .await?;
            return Ok(Flow::Continue);
        };

        let (reply, rx) = oneshot::channel();
        self.send_event(Event::SetupPlay {
            client: self.id,
            path: path.clone(),
            protocol: th.protocol,
            rtp_port: th.rtp_port,
            rtcp_port: th.rtcp_port,
            reply,
        })
        .await?;

        match rx.await.map_err(|_| Error::Terminated)? {
            Ok(()) => {
                self.path = Some(path);
                self.protocol = Some(th.protocol);
                self.tracks.push(TrackPorts {
                    rtp: th.rtp_port,
                    rtcp: th.rtcp_port,
                });
                self.state = ClientState::PrePlay;
                self.respond_setup_ok(cseq, &th).await?;
                Ok(Flow::Continue)
            }
            Err(err) => self.refuse(cseq, &err).await,
        }
    }

    async fn handle_setup_record(&mut self, cseq: &str, th: TransportHeader) -> Result<Flow, Error> {
        if !self.state.can_setup_record() {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }

        let (reply, rx) = oneshot::channel();
        self.send_event(Event::SetupRecord {
            client: self.id,
            protocol: th.protocol,
            rtp_port: th.rtp_port,
            rtcp_port: th.rtcp_port,
            reply,
        })
        .await?;

        match rx.await.map_err(|_| Error::Terminated)? {
            Ok(()) => {
                self.protocol = Some(th.protocol);
                self.tracks.push(TrackPorts {
                    rtp: th.rtp_port,
                    rtcp: th.rtcp_port,
                });
                self.state = ClientState::PreRecord;
                self.respond_setup_ok(cseq, &th).await?;
                Ok(Flow::Continue)
            }
            Err(err) => self.refuse(cseq, &err).await,
        }
    }

    async fn respond_setup_ok(&mut self, cseq: &str, th: &TransportHeader) -> Result<(), Error> {
        let answer = match th.protocol {
            StreamProtocol::Udp => transport::answer_udp(
                th.rtp_port,
                th.rtcp_port,
                self.udp_ports.0,
                self.udp_ports.1,
            ),
            StreamProtocol::Tcp => transport::answer_tcp(th.rtp_port, th.rtcp_port),
        };
        let session_id = self.ensure_session_id();
        self.respond(
            Response::ok()
                .header("CSeq", cseq)
                .header("Transport", &answer)
                .header("Session", &session_id),
        )
        .await
    }

    async fn handle_play(&mut self, cseq: &str) -> Result<Flow, Error> {
        if self.state != ClientState::PrePlay {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }

        let (reply, rx) = oneshot::channel();
        self.send_event(Event::Play1 {
            client: self.id,
            reply,
        })
        .await?;
        if let Err(err) = rx.await.map_err(|_| Error::Terminated)? {
            return self.refuse(cseq, &err).await;
        }

        // 200 first, then the commitment: the response is queued ahead of
        // any frame the coordinator fans out after Play2.
        self.respond(self.with_session(Response::ok().header("CSeq", cseq)))
            .await?;

        let (done, rx) = oneshot::channel();
        self.send_event(Event::Play2 {
            client: self.id,
            done,
        })
        .await?;
        let _ = rx.await;
        self.state = ClientState::Play;
        Ok(Flow::Continue)
    }

    async fn handle_pause(&mut self, cseq: &str) -> Result<Flow, Error> {
        if self.state != ClientState::Play {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }

        let (done, rx) = oneshot::channel();
        self.send_event(Event::PlayStop {
            client: self.id,
            done,
        })
        .await?;
        let _ = rx.await;
        self.state = ClientState::PrePlay;

        self.respond(self.with_session(Response::ok().header("CSeq", cseq)))
            .await?;
        Ok(Flow::Continue)
    }

    async fn handle_record(&mut self, cseq: &str) -> Result<Flow, Error> {
        if self.state != ClientState::PreRecord {
            return self.refuse(cseq, &ControlError::InvalidState).await;
        }
        if self.tracks.len() != self.announced_tracks {
            return self.refuse(cseq, &ControlError::TracksNotSetup).await;
        }

        let (done, rx) = oneshot::channel();
        self.send_event(Event::Record {
            client: self.id,
            done,
        })
        .await?;
        let _ = rx.await;
        self.state = ClientState::Record;

        self.respond(self.with_session(Response::ok().header("CSeq", cseq)))
            .await?;
        Ok(Flow::Continue)
    }

    /// Interleaved frame read from the control connection. Only meaningful
    /// for a TCP publisher; anything else (e.g. receiver reports from a
    /// playing client) is dropped.
    async fn handle_frame(&mut self, channel: u8, payload: Bytes) -> Result<Flow, Error> {
        if self.state != ClientState::Record || self.protocol != Some(StreamProtocol::Tcp) {
            return Ok(Flow::Continue);
        }
        let Some(path) = self.path.clone() else {
            return Ok(Flow::Continue);
        };
        let Some((track_id, stream_type)) = self.track_for_channel(channel) else {
            tracing::trace!(client_id = self.id, channel, "frame on unknown channel");
            return Ok(Flow::Continue);
        };

        self.send_event(Event::FrameTcp {
            path,
            track_id,
            stream_type,
            payload,
        })
        .await?;
        Ok(Flow::Continue)
    }

    fn track_for_channel(&self, channel: u8) -> Option<(usize, StreamType)> {
        let channel = u16::from(channel);
        self.tracks.iter().enumerate().find_map(|(i, t)| {
            if t.rtp == channel {
                Some((i, StreamType::Rtp))
            } else if t.rtcp == channel {
                Some((i, StreamType::Rtcp))
            } else {
                None
            }
        })
    }

    /// Refusal → RTSP status line carrying the coordinator's message.
    async fn refuse(&mut self, cseq: &str, err: &ControlError) -> Result<Flow, Error> {
        tracing::warn!(client_id = self.id, addr = %self.addr, "refused: {}", err);
        let (code, _) = err.status();
        self.respond(Response::new(code, &err.to_string()).header("CSeq", cseq))
            .await?;
        Ok(Flow::Continue)
    }

    async fn respond(&self, response: Response) -> Result<(), Error> {
        self.responses
            .send(response.serialize())
            .await
            .map_err(|_| Error::Terminated)
    }

    async fn send_event(&self, event: Event) -> Result<(), Error> {
        self.events.send(event).await.map_err(|_| Error::Terminated)
    }

    fn with_session(&self, response: Response) -> Response {
        match &self.session_id {
            Some(id) => response.header("Session", id),
            None => response,
        }
    }

    fn ensure_session_id(&mut self) -> String {
        if let Some(id) = &self.session_id {
            return id.clone();
        }
        let id = rand::thread_rng().gen_range(10_000_000u32..100_000_000).to_string();
        self.session_id = Some(id.clone());
        id
    }

    /// Close sequence shared by every exit path. Counter transitions first,
    /// then the idempotent close; the drainer answers these if the
    /// coordinator is already gone.
    async fn close_sequence(self) {
        match self.state {
            ClientState::Play => {
                let (done, rx) = oneshot::channel();
                if self
                    .events
                    .send(Event::PlayStop {
                        client: self.id,
                        done,
                    })
                    .await
                    .is_ok()
                {
                    let _ = rx.await;
                }
            }
            ClientState::Record => {
                let (done, rx) = oneshot::channel();
                if self
                    .events
                    .send(Event::RecordStop {
                        client: self.id,
                        done,
                    })
                    .await
                    .is_ok()
                {
                    let _ = rx.await;
                }
            }
            _ => {}
        }

        let (done, rx) = oneshot::channel();
        if self
            .events
            .send(Event::ClientClose {
                client: self.id,
                done,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Read one inbound message: an interleaved frame or a request head + body.
async fn read_message(reader: &mut BufReader<OwnedReadHalf>) -> Result<Inbound, Error> {
    use std::io::{Error as IoError, ErrorKind};

    let first = {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(IoError::from(ErrorKind::UnexpectedEof).into());
        }
        buf[0]
    };

    if first == INTERLEAVED_MAGIC {
        let mut header = [0u8; interleaved::HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let (channel, len) = interleaved::parse_header([header[1], header[2], header[3]]);
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        return Ok(Inbound::Frame(channel, Bytes::from(payload)));
    }

    let mut head = String::new();
    loop {
        let start = head.len();
        let n = reader.read_line(&mut head).await?;
        if n == 0 {
            return Err(IoError::from(ErrorKind::UnexpectedEof).into());
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(ProtocolError::MessageTooLarge.into());
        }
        let line = head[start..].trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            // Leading blank lines between messages are tolerated.
            if head.trim().is_empty() {
                head.clear();
                continue;
            }
            break;
        }
    }

    let request = Request::parse(&head).map_err(Error::Protocol)?;
    let content_length = request.content_length();
    if content_length > MAX_BODY_SIZE {
        return Err(ProtocolError::MessageTooLarge.into());
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }
    Ok(Inbound::Request(request, Bytes::from(body)))
}

/// Writer task: sole owner of the TCP write half. Responses are lossless
/// and take priority; frames come from the latest-wins slot.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut responses: mpsc::Receiver<Bytes>,
    mut frames: FrameReceiver,
) {
    let mut frames_open = true;
    loop {
        tokio::select! {
            biased;
            response = responses.recv() => match response {
                Some(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = frames.next(), if frames_open => match frame {
                Some(frame) => {
                    if write_half.write_all(&frame.encode()).await.is_err() {
                        break;
                    }
                }
                // Coordinator dropped the entry; responses may still come.
                None => frames_open = false,
            },
        }
    }
}
