//! Server orchestration
//!
//! [`Server::bind`] loads the bound sockets, wires the coordinator, spawns
//! the configured source workers, and hands back a [`ServerHandle`] for
//! termination. [`Server::run`] drives the coordinator until Terminate and
//! returns only after draining: listeners stopped, sources joined, every
//! client session finished.

pub mod config;
pub mod introspect;
pub mod listener;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::coordinator::{Coordinator, Event, StreamType};
use crate::error::Result;
use crate::source::SourceWorker;
use crate::stats::ServerMetrics;

use config::Config;
use listener::RtspListener;
use udp::UdpListener;

/// Bound on queued coordinator events; senders block when it fills.
const EVENT_QUEUE: usize = 64;

/// A bound, wired server ready to run.
pub struct Server {
    coordinator: Coordinator,
    source_tasks: Vec<JoinHandle<()>>,
    events: mpsc::Sender<Event>,
    rtsp_addr: SocketAddr,
}

/// Cloneable handle for asking a running server to terminate.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<Event>,
}

impl ServerHandle {
    /// Queue Terminate; [`Server::run`] returns once draining finished.
    pub async fn terminate(&self) {
        let _ = self.events.send(Event::Terminate).await;
    }
}

impl Server {
    /// Bind every socket and wire the components. Bind failures surface
    /// here, before anything runs.
    pub async fn bind(config: Config) -> Result<Server> {
        let metrics = Arc::new(ServerMetrics::new());
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (rtp_tx, rtp_rx) = mpsc::channel(udp::SEND_QUEUE);
        let (rtcp_tx, rtcp_rx) = mpsc::channel(udp::SEND_QUEUE);

        let rtp_listener = UdpListener::bind(config.rtp_port, StreamType::Rtp).await?;
        let rtcp_listener = UdpListener::bind(config.rtcp_port, StreamType::Rtcp).await?;
        let rtsp_listener = RtspListener::bind(config.rtsp_port).await?;
        let rtsp_addr = rtsp_listener.local_addr()?;
        let udp_ports = (
            rtp_listener.local_addr()?.port(),
            rtcp_listener.local_addr()?.port(),
        );

        let mut coordinator = Coordinator::new(
            events_rx,
            events_tx.clone(),
            rtp_tx,
            rtcp_tx,
            udp_ports,
            metrics.clone(),
        );

        coordinator.register_listener_task(rtp_listener.spawn_recv_loop(events_tx.clone()));
        coordinator.register_listener_task(rtp_listener.spawn_send_loop(rtp_rx));
        coordinator.register_listener_task(rtcp_listener.spawn_recv_loop(events_tx.clone()));
        coordinator.register_listener_task(rtcp_listener.spawn_send_loop(rtcp_rx));
        coordinator.register_listener_task(rtsp_listener.spawn_accept_loop(events_tx.clone()));

        let mut source_tasks = Vec::new();
        for (path, path_config) in &config.paths {
            if path_config.is_record() {
                continue;
            }
            let shutdown = Arc::new(Notify::new());
            let source_id = coordinator.register_source(path.clone(), shutdown.clone());
            let worker = SourceWorker::new(
                source_id,
                path.clone(),
                &path_config.source,
                path_config.source_protocol.into(),
                events_tx.clone(),
                shutdown,
            )?;
            source_tasks.push(tokio::spawn(worker.run()));
        }

        if config.pprof {
            coordinator.register_listener_task(introspect::serve(metrics).await?);
        }

        tracing::info!(
            "listening on :{} (rtsp), :{} (rtp/udp), :{} (rtcp/udp)",
            rtsp_addr.port(),
            udp_ports.0,
            udp_ports.1
        );

        Ok(Server {
            coordinator,
            source_tasks,
            events: events_tx,
            rtsp_addr,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events.clone(),
        }
    }

    /// Bound address of the RTSP listener (useful with port 0).
    pub fn rtsp_addr(&self) -> SocketAddr {
        self.rtsp_addr
    }

    /// Run until terminated. Everything is drained before this returns.
    pub async fn run(self) {
        let Server {
            coordinator,
            source_tasks,
            events,
            ..
        } = self;
        drop(events);

        coordinator.run().await;
        for task in source_tasks {
            let _ = task.await;
        }
    }
}
