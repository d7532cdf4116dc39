//! Client session state machine
//!
//! ```text
//! Initial ──ANNOUNCE──► Announce ──SETUP(record)──► PreRecord ──RECORD──► Record
//! Initial ──SETUP(play)──► PrePlay ──PLAY──► Play
//! PreRecord ──SETUP(record)──► PreRecord            (add track)
//! PrePlay   ──SETUP(play)───► PrePlay               (add track)
//! Play ──PAUSE──► PrePlay          Record ──teardown──► PreRecord
//! any ──TEARDOWN / close──► (terminal)
//! ```
//!
//! Transitions are committed by the coordinator; sessions keep a local
//! mirror of their own state to drive request dispatch.

use std::fmt;

/// Lifecycle state of one RTSP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, nothing negotiated yet.
    Initial,
    /// ANNOUNCE accepted, path claimed for publishing.
    Announce,
    /// At least one receiving track set up, PLAY not committed.
    PrePlay,
    /// Receiving media.
    Play,
    /// At least one publishing track set up, RECORD not committed.
    PreRecord,
    /// Publishing media.
    Record,
}

impl ClientState {
    /// SETUP with a play transport is allowed from these states.
    pub fn can_setup_play(self) -> bool {
        matches!(self, ClientState::Initial | ClientState::PrePlay)
    }

    /// SETUP with `mode=record` is allowed from these states.
    pub fn can_setup_record(self) -> bool {
        matches!(self, ClientState::Announce | ClientState::PreRecord)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Initial => "initial",
            ClientState::Announce => "announce",
            ClientState::PrePlay => "pre-play",
            ClientState::Play => "play",
            ClientState::PreRecord => "pre-record",
            ClientState::Record => "record",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_play_allowed_states() {
        assert!(ClientState::Initial.can_setup_play());
        assert!(ClientState::PrePlay.can_setup_play());
        assert!(!ClientState::Announce.can_setup_play());
        assert!(!ClientState::Play.can_setup_play());
        assert!(!ClientState::Record.can_setup_play());
    }

    #[test]
    fn test_setup_record_allowed_states() {
        assert!(ClientState::Announce.can_setup_record());
        assert!(ClientState::PreRecord.can_setup_record());
        assert!(!ClientState::Initial.can_setup_record());
        assert!(!ClientState::PrePlay.can_setup_record());
    }
}
