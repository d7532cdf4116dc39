//! Coordinator refusals
//!
//! Non-fatal rejections of client requests. Sessions translate these into
//! RTSP status lines and keep the connection alive when it is still usable.

use thiserror::Error;

/// Why the coordinator refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("someone is already publishing on path '{0}'")]
    AlreadyPublishing(String),

    #[error("no one is streaming on path '{0}'")]
    NoOneStreaming(String),

    #[error("all the tracks have already been setup")]
    TracksAlreadySetup,

    #[error("not all tracks have been setup")]
    TracksNotSetup,

    /// The request is not valid in the client's current state.
    #[error("request is not valid in the current state")]
    InvalidState,

    /// The coordinator is draining; no further operations are accepted.
    #[error("terminated")]
    Terminated,
}

impl ControlError {
    /// RTSP status line this refusal maps to.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ControlError::AlreadyPublishing(_) => (400, "Bad Request"),
            ControlError::NoOneStreaming(_) => (404, "Not Found"),
            ControlError::TracksAlreadySetup => (400, "Bad Request"),
            ControlError::TracksNotSetup => (400, "Bad Request"),
            ControlError::InvalidState => (455, "Method Not Valid in This State"),
            ControlError::Terminated => (500, "Internal Server Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_path() {
        let err = ControlError::AlreadyPublishing("cam".into());
        assert_eq!(
            err.to_string(),
            "someone is already publishing on path 'cam'"
        );
        assert_eq!(err.status().0, 400);

        let err = ControlError::NoOneStreaming("cam".into());
        assert_eq!(err.to_string(), "no one is streaming on path 'cam'");
        assert_eq!(err.status().0, 404);
    }
}
