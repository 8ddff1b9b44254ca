use std::sync::Arc;
use sttd_core::{RecognitionResult, SessionState, SpeechStatus, SttError};

pub type ResultCallback = Arc<dyn Fn(&RecognitionResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SttError) + Send + Sync>;
pub type StateChangedCallback = Arc<dyn Fn(SessionState, SessionState) + Send + Sync>;
pub type LanguageChangedCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type SpeechStatusCallback = Arc<dyn Fn(SpeechStatus) + Send + Sync>;

/// At most one handler per event kind.
///
/// Registration and unregistration are legal only while the handle is in
/// `Created`, which rules out a handler swap racing in-flight delivery:
/// once the handle leaves `Created` the slots are stable until it returns.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    pub result: Option<ResultCallback>,
    pub error: Option<ErrorCallback>,
    pub state_changed: Option<StateChangedCallback>,
    pub language_changed: Option<LanguageChangedCallback>,
    pub speech_status: Option<SpeechStatusCallback>,
}

impl CallbackRegistry {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
