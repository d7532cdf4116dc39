//! UDP listener pair
//!
//! One listener per stream type (RTP, RTCP), each bound for the lifetime of
//! the process. The recv loop turns datagrams into [`Event::FrameUdp`]; the
//! coordinator demultiplexes by source address. The send loop is the single
//! writer of the socket, draining a bounded queue fed by the coordinator's
//! fan-out. Send and receive errors are logged and ignored — media is lossy
//! by contract.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::{Event, StreamType};
use crate::error::Result;

/// Bound on queued outbound datagrams; overflow drops frames.
pub const SEND_QUEUE: usize = 256;

const RECV_BUF: usize = 2048;

/// One outbound datagram.
#[derive(Debug)]
pub struct Datagram {
    pub dest: SocketAddr,
    pub payload: Bytes,
}

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    stream_type: StreamType,
}

impl UdpListener {
    pub async fn bind(port: u16, stream_type: StreamType) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(UdpListener {
            socket: Arc::new(socket),
            stream_type,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn spawn_recv_loop(&self, events: mpsc::Sender<Event>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let stream_type = self.stream_type;
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, addr)) => {
                        let event = Event::FrameUdp {
                            addr,
                            stream_type,
                            payload: Bytes::copy_from_slice(&buf[..n]),
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::trace!(error = %err, "udp recv error");
                    }
                }
            }
        })
    }

    pub fn spawn_send_loop(&self, mut queue: mpsc::Receiver<Datagram>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            while let Some(Datagram { dest, payload }) = queue.recv().await {
                if let Err(err) = socket.send_to(&payload, dest).await {
                    tracing::trace!(error = %err, %dest, "udp send error");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_loop_emits_frame_events() {
        let listener = UdpListener::bind(0, StreamType::Rtp).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let _task = listener.spawn_recv_loop(events_tx);

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"\x80\x60datagram", ("127.0.0.1", addr.port()))
            .await
            .unwrap();

        match events_rx.recv().await.unwrap() {
            Event::FrameUdp {
                addr: from,
                stream_type,
                payload,
            } => {
                assert_eq!(from.port(), sender.local_addr().unwrap().port());
                assert_eq!(stream_type, StreamType::Rtp);
                assert_eq!(payload.as_ref(), b"\x80\x60datagram");
            }
            _ => panic!("expected FrameUdp"),
        }
    }

    #[tokio::test]
    async fn test_send_loop_delivers_queued_datagrams() {
        let listener = UdpListener::bind(0, StreamType::Rtcp).await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (queue_tx, queue_rx) = mpsc::channel(4);
        let _task = listener.spawn_send_loop(queue_rx);

        queue_tx
            .send(Datagram {
                dest: receiver.local_addr().unwrap(),
                payload: Bytes::from_static(b"report"),
            })
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"report");
    }
}
