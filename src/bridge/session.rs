//! Session registry and recovery bookkeeping.
//!
//! The bridge never mints session identifiers. It remembers which ones the
//! current agent generation handed out so that an identifier left over from
//! a previous process is recognised as invalid before it reaches the agent.
//!
//! The set is bounded: past [`MAX_KNOWN_SESSIONS`] the least recently used
//! identifier is forgotten, and a client resuming it gets a new session.

use std::collections::VecDeque;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::bridge::supervisor::Lifecycle;

/// Sessions remembered per agent generation.
pub const MAX_KNOWN_SESSIONS: usize = 1024;

/// Registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session known to be current.
    NoSession,
    /// `session_id` completed its last prompt successfully.
    Active(String),
    /// A prompt failed with session loss and is being replayed on a new session.
    Recovering,
}

/// Sessions created by the live agent generation.
#[derive(Debug)]
pub struct SessionRegistry {
    lifecycle: watch::Receiver<Lifecycle>,
    generation: Option<u64>,
    // Least recently used first.
    known: VecDeque<String>,
    capacity: usize,
    state: SessionState,
}

impl SessionRegistry {
    /// Registry following the supervisor's lifecycle channel.
    #[must_use]
    pub fn new(lifecycle: watch::Receiver<Lifecycle>) -> Self {
        Self::with_capacity(lifecycle, MAX_KNOWN_SESSIONS)
    }

    /// Registry remembering at most `capacity` sessions (minimum one).
    #[must_use]
    pub fn with_capacity(lifecycle: watch::Receiver<Lifecycle>, capacity: usize) -> Self {
        Self {
            lifecycle,
            generation: None,
            known: VecDeque::new(),
            capacity: capacity.max(1),
            state: SessionState::NoSession,
        }
    }

    /// Current state, after applying pending lifecycle transitions.
    pub fn state(&mut self) -> &SessionState {
        self.sync();
        &self.state
    }

    /// Number of sessions valid in the current generation.
    pub fn known_count(&mut self) -> usize {
        self.sync();
        self.known.len()
    }

    /// Session to prompt for a client-supplied identifier.
    ///
    /// Returns `None` when a new session has to be created: no identifier,
    /// or one this agent generation never issued.
    pub fn resolve(&mut self, requested: Option<&str>) -> Option<String> {
        self.sync();
        let requested = requested?;
        if self.touch(requested) {
            return Some(requested.to_owned());
        }
        debug!(
            session_id = requested,
            "session unknown to the current agent, creating a new one"
        );
        None
    }

    /// Remember a session returned by `session/new`.
    pub fn record_created(&mut self, session_id: &str) {
        self.sync();
        if !self.touch(session_id) {
            self.known.push_back(session_id.to_owned());
        }
        while self.known.len() > self.capacity {
            if let Some(evicted) = self.known.pop_front() {
                debug!(session_id = %evicted, "forgetting least recently used session");
            }
        }
        info!(session_id, "session created");
    }

    /// Mark `session_id` current after a successful prompt.
    pub fn record_success(&mut self, session_id: &str) {
        self.sync();
        self.state = SessionState::Active(session_id.to_owned());
    }

    /// Forget `lost` and enter recovery.
    pub fn begin_recovery(&mut self, lost: &str) {
        self.sync();
        self.known.retain(|id| id != lost);
        self.state = SessionState::Recovering;
    }

    /// Drop all known sessions.
    pub fn reset(&mut self) {
        self.known.clear();
        self.state = SessionState::NoSession;
    }

    /// Move `session_id` to the most recently used end; `false` if unknown.
    fn touch(&mut self, session_id: &str) -> bool {
        let Some(index) = self.known.iter().position(|id| id == session_id) else {
            return false;
        };
        if let Some(id) = self.known.remove(index) {
            self.known.push_back(id);
        }
        true
    }

    fn sync(&mut self) {
        let observed = *self.lifecycle.borrow_and_update();
        let live = match observed {
            Lifecycle::Running { generation } => Some(generation),
            Lifecycle::Stopped | Lifecycle::Starting | Lifecycle::Crashed { .. } => None,
        };
        if live == self.generation {
            return;
        }
        if !self.known.is_empty() {
            info!(
                dropped = self.known.len(),
                lifecycle = ?observed,
                "agent generation changed, forgetting sessions"
            );
        }
        self.generation = live;
        self.reset();
    }
}
