use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use sttd_core::{HandleId, RecognitionType, SessionEvent, SessionEventKind, SessionState};
use sttd_engine::SttEngine;
use tokio::sync::mpsc;

/// Daemon-side record of one prepared session.
pub struct Session {
    pub handle: HandleId,
    pub app_id: String,
    pub engine_id: String,
    pub language: String,
    pub recognition_type: RecognitionType,
    pub state: SessionState,
    pub silence_detection: bool,
    /// Sequence number of the request whose events are currently being
    /// stamped for this handle.
    pub active_seq: u64,
    /// Last volume estimate (dBFS) while Recording.
    pub volume_db: f32,
    pub start_sound: Option<PathBuf>,
    pub stop_sound: Option<PathBuf>,
    pub event_tx: mpsc::UnboundedSender<SessionEvent>,
    /// The session's engine instance. The mutex serializes all calls into
    /// one instance.
    pub engine: Arc<tokio::sync::Mutex<Box<dyn SttEngine>>>,
}

impl Session {
    /// Push an event stamped with the session's active sequence number.
    pub fn emit(&self, kind: SessionEventKind) {
        let _ = self.event_tx.send(SessionEvent {
            seq: self.active_seq,
            kind,
        });
    }

    /// Transition to `next` and emit the matching state-changed event.
    pub fn transition(&mut self, next: SessionState) {
        let previous = self.state;
        self.state = next;
        tracing::debug!(handle = %self.handle, %previous, current = %next, "session transition");
        self.emit(SessionEventKind::StateChanged {
            previous,
            current: next,
        });
    }
}

/// Table of active sessions, keyed by handle id. Entries are created on
/// successful `prepare` and removed on `unprepare` or disconnect.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<HandleId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions.lock().unwrap().insert(session.handle, session);
    }

    pub fn remove(&self, handle: HandleId) -> Option<Session> {
        self.sessions.lock().unwrap().remove(&handle)
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.sessions.lock().unwrap().contains_key(&handle)
    }

    pub fn state(&self, handle: HandleId) -> Option<SessionState> {
        self.sessions.lock().unwrap().get(&handle).map(|s| s.state)
    }

    /// Run `f` against the session, if present.
    pub fn with<R>(&self, handle: HandleId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.lock().unwrap().get_mut(&handle).map(f)
    }

    pub fn handles(&self) -> Vec<HandleId> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}
