//! Single-writer coordinator
//!
//! All cross-session state — the path→publisher map, the client set, the
//! publisher/receiver gauges — is owned by one task that drains a bounded
//! event channel and processes events strictly serially. Nothing else ever
//! mutates that state, which is what makes the single-publisher invariant
//! and the counter bookkeeping lock-free by construction.
//!
//! # Architecture
//!
//! ```text
//!   TCP accept ──ClientNew──────┐
//!   sessions ───control events──┤      ┌──────────────────────────┐
//!   UDP listeners ──FrameUdp────┼────► │ Coordinator (one task)   │
//!   source workers ─SourceFrame─┘      │  clients: HashMap<Id,..> │
//!                                      │  publishers: path → pub  │
//!                                      │  counters                │
//!                                      └──────┬───────────────────┘
//!                                             │ fan-out
//!                          ┌──────────────────┼──────────────────┐
//!                          ▼                  ▼                  ▼
//!                   UDP send queues    receiver frame slots   (replies)
//! ```
//!
//! Sessions talk to the coordinator through [`Event`] values carrying
//! `oneshot` reply channels; a reply is observed only after the event has
//! been fully processed, which gives the causal ordering guarantee.

pub mod core;
pub mod error;
pub mod event;
pub mod publisher;

pub use self::core::Coordinator;
pub use error::ControlError;
pub use event::{ClientId, Event, SourceId, StreamType, TrackPorts};
pub use publisher::Publisher;
