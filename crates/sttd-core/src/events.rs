use crate::error::SttError;
use crate::types::{RecognitionResult, SessionState};

/// Begin/end-of-speech notification from the engine's silence detection.
/// Informational only; never changes session state by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechStatus {
    BeginningOfSpeech,
    EndOfSpeech,
}

/// One asynchronous event on a handle's sequenced delivery channel.
///
/// `seq` ties the event to the logical request that produced it; the client
/// dispatcher discards events whose sequence number predates a `cancel`.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub seq: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    /// Fired for every transition, including synchronous ones.
    StateChanged {
        previous: SessionState,
        current: SessionState,
    },
    /// Terminal success of one start/stop cycle.
    Result(RecognitionResult),
    /// Terminal failure of an asynchronous phase.
    Error(SttError),
    SpeechStatus(SpeechStatus),
}

/// Unsolicited daemon-wide notification; rides its own broadcast channel,
/// is never sequence-filtered and never touches session state.
#[derive(Debug, Clone)]
pub struct LanguageChanged {
    pub previous: String,
    pub current: String,
}
