//! Session state
//!
//! The mutable identity of a gateway session. Owned by the connection driver
//! and only mutated from the inbound dispatch path.

use crate::protocol::ResumePayload;

/// Result of observing a dispatch sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceUpdate {
    Advanced,
    /// Same as the current value
    Unchanged,
    /// Lower than the current value; ignored
    Stale { current: u64 },
}

/// Mutable session identity
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    sequence: u64,
    session_id: Option<String>,
    resume_url: Option<String>,
    connected: bool,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed sequence number (0 before any dispatch)
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sequence to report in a heartbeat; `None` before any dispatch
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        (self.sequence > 0).then_some(self.sequence)
    }

    /// Record a dispatch sequence number; never moves backwards
    pub fn observe_sequence(&mut self, sequence: u64) -> SequenceUpdate {
        if sequence > self.sequence {
            self.sequence = sequence;
            SequenceUpdate::Advanced
        } else if sequence == self.sequence {
            SequenceUpdate::Unchanged
        } else {
            SequenceUpdate::Stale {
                current: self.sequence,
            }
        }
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether the next handshake should be a Resume
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Resume endpoint announced by READY, if any
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Capture the session established by READY
    pub fn establish(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
    }

    /// Forget the session so the next handshake is a fresh Identify
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.resume_url = None;
    }

    /// A fresh Identify starts a new sequence
    pub fn begin_identify(&mut self) {
        self.sequence = 0;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Resume payload for the saved session
    pub(crate) fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        self.session_id.as_ref().map(|session_id| ResumePayload {
            token: token.to_string(),
            session_id: session_id.clone(),
            seq: self.sequence,
        })
    }
}
