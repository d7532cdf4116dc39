//! # rtsp-simple-server — RTSP server routing media between publishers and receivers
//!
//! A multi-tenant RTSP (RFC 2326) server. Publishers push RTP/RTCP onto a
//! named path with ANNOUNCE + SETUP + RECORD; receivers read it back with
//! DESCRIBE + SETUP + PLAY, over UDP or interleaved TCP. Paths may also be
//! configured to pull an upstream RTSP server, in which case an internal
//! source worker republishes the stream for local receivers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ server      — config (YAML), TCP accept, UDP listeners, │
//! │               introspection endpoint, wiring            │
//! ├─────────────────────────────────────────────────────────┤
//! │ coordinator — single-writer event loop: path→publisher  │
//! │               map, client set, counters, frame fan-out  │
//! ├─────────────────────────────────────────────────────────┤
//! │ session     — per-client reader/writer tasks, RTSP      │
//! │               state machine, latest-wins frame slot     │
//! │ source      — supervised upstream pullers               │
//! ├─────────────────────────────────────────────────────────┤
//! │ protocol    — RTSP requests/responses, Transport        │
//! │               header, interleaved framing               │
//! │ sdp, rtcp   — session descriptions, arrival statistics  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every task talks to the coordinator through one event channel and the
//! coordinator alone mutates cross-session state, which keeps the
//! single-publisher-per-path invariant and the counters lock-free.
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_simple_server::{Config, Server};
//!
//! # async fn example() -> rtsp_simple_server::Result<()> {
//! let config = Config::load("rtsp-simple-server.yml")?;
//! let server = Server::bind(config).await?;
//! server.run().await;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod rtcp;
pub mod sdp;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use server::config::Config;
pub use server::{Server, ServerHandle};
