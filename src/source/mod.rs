//! Source workers
//!
//! For every configured path whose `source` is an RTSP URL, the server runs
//! a supervised worker that dials the upstream, negotiates
//! DESCRIBE → SETUP → PLAY for every advertised track, and pumps inbound
//! frames to the coordinator as [`Event::SourceFrame`]. The worker reports
//! `SourceReady` once fully negotiated and `SourceNotReady` when the
//! upstream goes away, then reconnects after a fixed backoff. It never dies
//! permanently; only a shutdown notification ends it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use url::Url;

use crate::coordinator::{Event, SourceId, StreamType};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::transport::{self, StreamProtocol};
use crate::protocol::{interleaved, Response, INTERLEAVED_MAGIC};
use crate::sdp::{MediaDescription, SessionDescription};

const DEFAULT_RTSP_PORT: u16 = 554;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_BODY_SIZE: usize = 256 * 1024;
const UDP_RECV_BUF: usize = 2048;

/// One supervised upstream puller.
pub struct SourceWorker {
    id: SourceId,
    path: String,
    url: Url,
    protocol: StreamProtocol,
    events: mpsc::Sender<Event>,
    shutdown: Arc<Notify>,
}

impl SourceWorker {
    pub fn new(
        id: SourceId,
        path: String,
        url: &str,
        protocol: StreamProtocol,
        events: mpsc::Sender<Event>,
        shutdown: Arc<Notify>,
    ) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::SourceUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "rtsp" {
            return Err(Error::SourceUrl {
                url: url.to_string(),
                reason: "scheme must be rtsp".to_string(),
            });
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(Error::SourceUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(SourceWorker {
            id,
            path,
            url: parsed,
            protocol,
            events,
            shutdown,
        })
    }

    /// Supervision loop: connect, pump, report, back off, repeat.
    pub async fn run(self) {
        loop {
            let stopped = tokio::select! {
                _ = self.shutdown.notified() => true,
                result = self.run_once() => match result {
                    // The coordinator is gone; nothing left to feed.
                    Err(Error::Terminated) => true,
                    Err(err) => {
                        tracing::warn!(path = %self.path, error = %err, "source disconnected");
                        false
                    }
                    Ok(()) => false,
                },
            };
            if stopped {
                break;
            }

            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        tracing::debug!(path = %self.path, "source worker stopped");
    }

    /// One connection lifetime: negotiate, report ready, pump until the
    /// upstream fails, report not ready.
    async fn run_once(&self) -> Result<()> {
        let host = self.url.host_str().unwrap_or_default().to_string();
        let port = self.url.port().unwrap_or(DEFAULT_RTSP_PORT);
        let conn = TcpStream::connect((host.as_str(), port)).await?;
        let (read_half, write_half) = conn.into_split();
        let mut client = RtspClient::new(read_half, write_half, self.url.clone());

        let (sdp_text, sdp) = client.describe().await?;

        let mut udp_tracks = Vec::new();
        for (track_id, media) in sdp.media_descriptions.iter().enumerate() {
            let track_url = client.track_url(media, track_id);
            match self.protocol {
                StreamProtocol::Tcp => {
                    let channel = (track_id * 2) as u16;
                    client
                        .setup(&track_url, &transport::request_tcp(channel, channel + 1))
                        .await?;
                }
                StreamProtocol::Udp => {
                    let track = UdpTrack::bind().await?;
                    client
                        .setup(
                            &track_url,
                            &transport::request_udp(track.rtp_port()?, track.rtcp_port()?),
                        )
                        .await?;
                    udp_tracks.push(track);
                }
            }
        }
        client.play().await?;

        self.send(Event::SourceReady {
            source: self.id,
            sdp_text,
            sdp,
        })
        .await?;

        let result = match self.protocol {
            StreamProtocol::Tcp => self.pump_tcp(client).await,
            StreamProtocol::Udp => self.pump_udp(client, udp_tracks).await,
        };

        // Best-effort; during draining the channel may already be closed.
        let _ = self
            .events
            .send(Event::SourceNotReady { source: self.id })
            .await;
        result
    }

    /// Interleaved mode: frames and keepalive replies share the control
    /// connection.
    async fn pump_tcp(&self, mut client: RtspClient) -> Result<()> {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // the first tick is immediate

        loop {
            tokio::select! {
                _ = keepalive.tick() => client.send_keepalive().await?,
                inbound = client.read_inbound() => match inbound? {
                    ClientInbound::Frame(channel, payload) => {
                        let track_id = usize::from(channel / 2);
                        let stream_type = if channel % 2 == 0 {
                            StreamType::Rtp
                        } else {
                            StreamType::Rtcp
                        };
                        self.send(Event::SourceFrame {
                            source: self.id,
                            track_id,
                            stream_type,
                            payload,
                        })
                        .await?;
                    }
                    // Keepalive replies.
                    ClientInbound::Response(_, _) => {}
                },
            }
        }
    }

    /// UDP mode: per-track recv loops feed frames directly; the control
    /// connection only carries keepalives and signals upstream loss.
    async fn pump_udp(&self, mut client: RtspClient, tracks: Vec<UdpTrack>) -> Result<()> {
        let mut recv_tasks = Vec::new();
        for (track_id, track) in tracks.into_iter().enumerate() {
            recv_tasks.extend(track.spawn_recv_loops(self.id, track_id, self.events.clone()));
        }

        let result = async {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            keepalive.tick().await;

            loop {
                tokio::select! {
                    _ = keepalive.tick() => client.send_keepalive().await?,
                    inbound = client.read_inbound() => { inbound?; }
                }
            }
        }
        .await;

        for task in recv_tasks {
            task.abort();
        }
        result
    }

    async fn send(&self, event: Event) -> Result<()> {
        self.events.send(event).await.map_err(|_| Error::Terminated)
    }
}

/// A bound even/odd UDP port pair for one track.
struct UdpTrack {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl UdpTrack {
    /// Probe random even base ports until a consecutive pair binds.
    async fn bind() -> Result<Self> {
        for _ in 0..16 {
            let base = rand::thread_rng().gen_range(10_000u16..32_000) * 2;
            let Ok(rtp) = UdpSocket::bind(("0.0.0.0", base)).await else {
                continue;
            };
            let Ok(rtcp) = UdpSocket::bind(("0.0.0.0", base + 1)).await else {
                continue;
            };
            return Ok(UdpTrack { rtp, rtcp });
        }
        Err(io::Error::new(io::ErrorKind::AddrInUse, "no free udp port pair").into())
    }

    fn rtp_port(&self) -> Result<u16> {
        Ok(self.rtp.local_addr()?.port())
    }

    fn rtcp_port(&self) -> Result<u16> {
        Ok(self.rtcp.local_addr()?.port())
    }

    fn spawn_recv_loops(
        self,
        source: SourceId,
        track_id: usize,
        events: mpsc::Sender<Event>,
    ) -> [JoinHandle<()>; 2] {
        [
            tokio::spawn(recv_loop(
                self.rtp,
                source,
                track_id,
                StreamType::Rtp,
                events.clone(),
            )),
            tokio::spawn(recv_loop(
                self.rtcp,
                source,
                track_id,
                StreamType::Rtcp,
                events,
            )),
        ]
    }
}

async fn recv_loop(
    socket: UdpSocket,
    source: SourceId,
    track_id: usize,
    stream_type: StreamType,
    events: mpsc::Sender<Event>,
) {
    let mut buf = vec![0u8; UDP_RECV_BUF];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, _)) => {
                let payload = Bytes::copy_from_slice(&buf[..n]);
                let event = Event::SourceFrame {
                    source,
                    track_id,
                    stream_type,
                    payload,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::trace!(error = %err, "source udp recv error");
            }
        }
    }
}

/// What the upstream sent us next.
enum ClientInbound {
    Frame(u8, Bytes),
    Response(Response, Bytes),
}

/// Minimal client side of RTSP, enough to pull a stream.
struct RtspClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    url: Url,
    cseq: u32,
    session: Option<String>,
}

impl RtspClient {
    fn new(read_half: OwnedReadHalf, write_half: OwnedWriteHalf, url: Url) -> Self {
        RtspClient {
            reader: BufReader::new(read_half),
            writer: write_half,
            url,
            cseq: 0,
            session: None,
        }
    }

    fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }

    /// SETUP target for one track: the `control:` attribute resolved
    /// against the base URL, or a positional fallback.
    fn track_url(&self, media: &MediaDescription, track_id: usize) -> String {
        match media.control() {
            Some(control) if control.starts_with("rtsp://") => control.to_string(),
            Some(control) => format!("{}/{}", self.base_url(), control),
            None => format!("{}/trackId={}", self.base_url(), track_id),
        }
    }

    async fn describe(&mut self) -> Result<(Bytes, SessionDescription)> {
        let url = self.base_url();
        let (_, body) = self
            .request("DESCRIBE", &url, &[("Accept", "application/sdp")])
            .await?;
        let sdp = SessionDescription::parse(&body)?;
        if sdp.media_descriptions.is_empty() {
            return Err(ProtocolError::InvalidSdp("no media descriptions".to_string()).into());
        }
        Ok((body, sdp))
    }

    async fn setup(&mut self, track_url: &str, transport_value: &str) -> Result<()> {
        self.request("SETUP", track_url, &[("Transport", transport_value)])
            .await?;
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let url = self.base_url();
        self.request("PLAY", &url, &[]).await?;
        Ok(())
    }

    /// Fire-and-forget OPTIONS; the reply is consumed by the pump.
    async fn send_keepalive(&mut self) -> Result<()> {
        let url = self.base_url();
        let head = self.build_request("OPTIONS", &url, &[]);
        self.writer.write_all(head.as_bytes()).await?;
        Ok(())
    }

    /// Send a request and wait for its (200) response. Only used during
    /// negotiation, before any frame can be in flight.
    async fn request(
        &mut self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<(Response, Bytes)> {
        let head = self.build_request(method, url, headers);
        self.writer.write_all(head.as_bytes()).await?;

        let (response, body) = tokio::time::timeout(RESPONSE_TIMEOUT, self.read_response())
            .await
            .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::TimedOut, "response timeout")))??;

        if response.status_code != 200 {
            return Err(ProtocolError::UnexpectedStatus(response.status_code).into());
        }
        if let Some(session) = response.get_header("Session") {
            // "12345678;timeout=60" → "12345678"
            let id = session.split(';').next().unwrap_or(session).trim();
            self.session = Some(id.to_string());
        }
        Ok((response, body))
    }

    fn build_request(&mut self, method: &str, url: &str, headers: &[(&str, &str)]) -> String {
        self.cseq += 1;
        let mut head = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", method, url, self.cseq);
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(session) = &self.session {
            head.push_str(&format!("Session: {}\r\n", session));
        }
        head.push_str("\r\n");
        head
    }

    async fn read_response(&mut self) -> Result<(Response, Bytes)> {
        loop {
            if let ClientInbound::Response(response, body) = self.read_inbound().await? {
                return Ok((response, body));
            }
        }
    }

    /// Read the next message: an interleaved frame or a response.
    async fn read_inbound(&mut self) -> Result<ClientInbound> {
        let first = {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            buf[0]
        };

        if first == INTERLEAVED_MAGIC {
            let mut header = [0u8; interleaved::HEADER_LEN];
            self.reader.read_exact(&mut header).await?;
            let (channel, len) = interleaved::parse_header([header[1], header[2], header[3]]);
            let mut payload = vec![0u8; len];
            self.reader.read_exact(&mut payload).await?;
            return Ok(ClientInbound::Frame(channel, Bytes::from(payload)));
        }

        let mut head = String::new();
        loop {
            let start = head.len();
            let n = self.reader.read_line(&mut head).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            if head.len() > MAX_HEAD_SIZE {
                return Err(ProtocolError::MessageTooLarge.into());
            }
            let line = head[start..].trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if head.trim().is_empty() {
                    head.clear();
                    continue;
                }
                break;
            }
        }

        let response = Response::parse(&head).map_err(Error::Protocol)?;
        let content_length = response.content_length();
        if content_length > MAX_BODY_SIZE {
            return Err(ProtocolError::MessageTooLarge.into());
        }
        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            self.reader.read_exact(&mut body).await?;
        }
        Ok(ClientInbound::Response(response, Bytes::from(body)))
    }
}
