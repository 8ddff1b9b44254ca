use async_trait::async_trait;
use sttd_core::{
    AudioChunk, EngineDescriptor, EngineError, RecognitionResult, RecognitionType,
    RecordingFormat, SpeechStatus, TokenTiming,
};
use tokio::sync::mpsc;

/// Event pushed upward by an engine while a request is active.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A recognition result for the active request.
    Result(RecognitionResult),
    /// A failure report. Does not by itself change session state; the
    /// daemon maps it onto the session state machine.
    Error(EngineError),
    /// Begin/end-of-speech from silence detection. Informational.
    SpeechStatus(SpeechStatus),
}

/// Outbound path from an engine to the daemon's per-session event pump.
///
/// Handed to the engine via [`SttEngine::set_event_sink`] before
/// `initialize`. Sends never block and never fail visibly; a dropped
/// receiver means the session is gone and the event is moot.
#[derive(Clone)]
pub struct EngineSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn result(&self, result: RecognitionResult) {
        let _ = self.tx.send(EngineEvent::Result(result));
    }

    pub fn error(&self, error: EngineError) {
        let _ = self.tx.send(EngineEvent::Error(error));
    }

    pub fn speech_status(&self, status: SpeechStatus) {
        let _ = self.tx.send(EngineEvent::SpeechStatus(status));
    }
}

/// Required capability set a recognition engine implements to be driven by
/// the daemon.
///
/// Every fallible capability returns [`EngineError`], a fixed outcome set;
/// the daemon normalizes anything without a dedicated protocol mapping to
/// a generic operation failure. A missing or failing required capability is
/// a fault. The one optional capability, [`PrivateDataChannel`], is probed
/// through [`private_data_channel`](Self::private_data_channel): `None`
/// disables the feature, never an error.
#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Static metadata: id, display name, languages, recognition types,
    /// silence-detection capability.
    fn descriptor(&self) -> EngineDescriptor;

    /// Wire the outbound event path. Called once, before `initialize`.
    fn set_event_sink(&mut self, sink: EngineSink);

    /// One-time initialisation with engine-specific TOML settings.
    async fn initialize(&mut self, settings: toml::Value) -> Result<(), EngineError>;

    /// Release engine resources. The engine must not send events afterwards.
    async fn deinitialize(&mut self) -> Result<(), EngineError>;

    fn is_valid_language(&self, tag: &str) -> bool;

    fn supported_languages(&self) -> Vec<String>;

    fn supports_silence_detection(&self) -> bool;

    fn set_silence_detection(&mut self, enabled: bool) -> Result<(), EngineError>;

    fn supports_recognition_type(&self, kind: RecognitionType) -> bool;

    /// PCM format this engine requires. Authoritative: the daemon delivers
    /// audio in exactly this format or not at all.
    fn recording_format(&self) -> RecordingFormat;

    /// Accept one chunk of recording data for the active request.
    async fn feed_audio(&self, chunk: AudioChunk) -> Result<(), EngineError>;

    /// Per-token timing for the most recent result, if the engine keeps any.
    fn result_timing(&self) -> Vec<TokenTiming>;

    /// Begin a recognition request. Audio follows via `feed_audio`.
    async fn start(&self, language: &str, kind: RecognitionType) -> Result<(), EngineError>;

    /// End of audio. The result arrives later through the event sink.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Discard the active request. No result or error may follow for it.
    async fn cancel(&self) -> Result<(), EngineError>;

    /// Whether the calling application has agreed to the engine's terms.
    fn check_app_agreed(&self, app_id: &str) -> Result<bool, EngineError>;

    /// Whether the engine requires an application credential at prepare.
    fn needs_app_credential(&self) -> bool;

    /// Optional private-data capability. Default: absent.
    fn private_data_channel(&self) -> Option<&dyn PrivateDataChannel> {
        None
    }
}

/// Optional engine capability: an opaque key/value side channel between an
/// application and its engine (receive side = `set`, provide side = `get`).
#[async_trait]
pub trait PrivateDataChannel: Send + Sync {
    async fn set(&self, key: &str, data: &str) -> Result<(), EngineError>;
    async fn get(&self, key: &str) -> Result<String, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EngineSink::channel();
        sink.speech_status(SpeechStatus::EndOfSpeech);
        sink.result(RecognitionResult {
            alternatives: vec!["hi".to_string()],
            is_final: true,
            timings: vec![],
        });

        match rx.try_recv().unwrap() {
            EngineEvent::SpeechStatus(SpeechStatus::EndOfSpeech) => {}
            other => panic!("expected speech status, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            EngineEvent::Result(r) => assert_eq!(r.alternatives[0], "hi"),
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_sink_send_after_receiver_drop_is_silent() {
        let (sink, rx) = EngineSink::channel();
        drop(rx);
        // Must not panic
        sink.error(EngineError::NetworkDown);
    }
}
