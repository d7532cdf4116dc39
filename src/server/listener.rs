//! RTSP TCP listener
//!
//! Pure accept loop: every accepted connection becomes a
//! [`Event::ClientNew`] for the coordinator, which constructs the session.
//! Accept errors are logged and the loop keeps going.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::Event;
use crate::error::Result;

pub struct RtspListener {
    listener: TcpListener,
}

impl RtspListener {
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(RtspListener { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn_accept_loop(self, events: mpsc::Sender<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((conn, addr)) => {
                        if let Err(err) = conn.set_nodelay(true) {
                            tracing::debug!(error = %err, "failed to set nodelay");
                        }
                        if events.send(Event::ClientNew { conn, addr }).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to accept connection");
                    }
                }
            }
        })
    }
}
