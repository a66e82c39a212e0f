//! Bookkeeping for the single in-flight transfer session.

use parcel_protocol::SessionKey;

use crate::types::ErrorKind;

/// Status of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    ErroredResumable,
    ErroredFatal,
    Completed,
}

/// Tracks the transfer of one item.
#[derive(Debug, Clone)]
pub struct TransferSession {
    key: SessionKey,
    size: u64,
    confirmed: u64,
    /// Furthest byte position reported by progress ticks.
    position: u64,
    status: SessionStatus,
    last_error: Option<String>,
}

impl TransferSession {
    /// Creates an active session for an item of `size` bytes.
    pub fn new(key: SessionKey, size: u64) -> Self {
        Self {
            key,
            size,
            confirmed: 0,
            position: 0,
            status: SessionStatus::Active,
            last_error: None,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn index(&self) -> usize {
        self.key.index
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bytes durably accepted by the remote side.
    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    /// Adds acknowledged bytes, clamped to the item size.
    pub fn add_confirmed(&mut self, bytes: u64) {
        self.confirmed = self.confirmed.saturating_add(bytes).min(self.size);
    }

    /// Records a progress tick for the in-flight chunk and returns the
    /// item bytes counted toward overall progress.
    ///
    /// The count is the confirmed bytes plus `loaded`, never less than
    /// what an earlier tick reported.
    pub fn record_progress(&mut self, loaded: u64) -> u64 {
        let position = self.confirmed.saturating_add(loaded).min(self.size);
        self.position = self.position.max(position);
        self.position
    }

    /// Bytes counted toward overall progress.
    pub fn counted(&self) -> u64 {
        self.position.max(self.confirmed)
    }

    /// Halts the session with an error.
    pub fn fail(&mut self, kind: ErrorKind, message: &str) {
        self.status = match kind {
            ErrorKind::Resumable => SessionStatus::ErroredResumable,
            ErrorKind::Fatal => SessionStatus::ErroredFatal,
        };
        self.last_error = Some(message.to_string());
    }

    /// Returns a resumable session to active. Confirmed bytes are kept.
    pub fn resume(&mut self) {
        if self.status == SessionStatus::ErroredResumable {
            self.status = SessionStatus::Active;
            self.last_error = None;
        }
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.confirmed = self.size;
        self.position = self.size;
    }

    /// Returns `true` if the transfer client holds state for this session
    /// that must be released on abandonment.
    pub fn needs_abort(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Active | SessionStatus::ErroredResumable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(size: u64) -> TransferSession {
        TransferSession::new(SessionKey::new(0, 1), size)
    }

    #[test]
    fn new_session_is_active() {
        let s = session(100);
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.confirmed(), 0);
        assert!(s.needs_abort());
        assert!(s.last_error().is_none());
    }

    #[test]
    fn confirmed_bytes_accumulate_and_clamp() {
        let mut s = session(100);
        s.add_confirmed(40);
        s.add_confirmed(40);
        assert_eq!(s.confirmed(), 80);
        s.add_confirmed(40);
        assert_eq!(s.confirmed(), 100);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let mut s = session(100);
        assert_eq!(s.record_progress(30), 30);
        assert_eq!(s.record_progress(10), 30);
        s.add_confirmed(30);
        assert_eq!(s.record_progress(20), 50);
        assert_eq!(s.counted(), 50);
    }

    #[test]
    fn resume_keeps_confirmed_bytes() {
        let mut s = session(100);
        s.add_confirmed(60);
        s.fail(ErrorKind::Resumable, "connection reset");
        assert_eq!(s.status(), SessionStatus::ErroredResumable);
        assert_eq!(s.last_error(), Some("connection reset"));
        assert!(s.needs_abort());

        s.resume();
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.confirmed(), 60);
        assert!(s.last_error().is_none());
    }

    #[test]
    fn fatal_session_needs_no_abort() {
        let mut s = session(100);
        s.fail(ErrorKind::Fatal, "token request failed");
        assert_eq!(s.status(), SessionStatus::ErroredFatal);
        assert!(!s.needs_abort());

        // Only resumable sessions can resume.
        s.resume();
        assert_eq!(s.status(), SessionStatus::ErroredFatal);
    }

    #[test]
    fn complete_counts_full_size() {
        let mut s = session(100);
        s.add_confirmed(10);
        s.complete();
        assert_eq!(s.status(), SessionStatus::Completed);
        assert_eq!(s.counted(), 100);
        assert!(!s.needs_abort());
    }
}
