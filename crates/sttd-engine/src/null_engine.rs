use crate::engine_trait::{EngineSink, PrivateDataChannel, SttEngine};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use sttd_core::{
    AudioChunk, EngineDescriptor, EngineError, RecognitionResult, RecognitionType,
    RecordingFormat, SpeechStatus, TokenTiming,
};

const DEFAULT_END_OF_SPEECH_BYTES: usize = 32000; // 1s of 16kHz mono s16le

struct ActiveRequest {
    language: String,
    fed_bytes: usize,
    speech_begun: bool,
    end_of_speech_sent: bool,
}

/// Mock engine that recognizes byte counts instead of speech.
///
/// Emits `BeginningOfSpeech` on the first fed chunk and, when silence
/// detection is enabled, `EndOfSpeech` once the accumulated audio crosses
/// the `end_of_speech_after_bytes` threshold (settings, default 1 second).
/// `stop` reports a single alternative naming the byte count.
pub struct NullEngine {
    sink: Mutex<Option<EngineSink>>,
    initialized: AtomicBool,
    silence_detection: AtomicBool,
    end_of_speech_after: AtomicUsize,
    active: Mutex<Option<ActiveRequest>>,
    last_timing: Mutex<Vec<TokenTiming>>,
    private: Mutex<HashMap<String, String>>,
}

impl NullEngine {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            initialized: AtomicBool::new(false),
            silence_detection: AtomicBool::new(false),
            end_of_speech_after: AtomicUsize::new(DEFAULT_END_OF_SPEECH_BYTES),
            active: Mutex::new(None),
            last_timing: Mutex::new(Vec::new()),
            private: Mutex::new(HashMap::new()),
        }
    }

    fn send(&self, f: impl FnOnce(&EngineSink)) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            f(sink);
        }
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttEngine for NullEngine {
    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            id: "null".to_string(),
            display_name: "Null recognizer".to_string(),
            languages: vec!["en-US".to_string(), "ko-KR".to_string()],
            recognition_types: vec![
                RecognitionType::Free,
                RecognitionType::FreePartial,
                RecognitionType::Search,
            ],
            supports_silence_detection: true,
        }
    }

    fn set_event_sink(&mut self, sink: EngineSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn initialize(&mut self, settings: toml::Value) -> Result<(), EngineError> {
        if let Some(n) = settings
            .get("end_of_speech_after_bytes")
            .and_then(|v| v.as_integer())
        {
            if n <= 0 {
                return Err(EngineError::InvalidParameter);
            }
            self.end_of_speech_after.store(n as usize, Ordering::Relaxed);
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn deinitialize(&mut self) -> Result<(), EngineError> {
        self.initialized.store(false, Ordering::Relaxed);
        *self.active.lock().unwrap() = None;
        *self.sink.lock().unwrap() = None;
        Ok(())
    }

    fn is_valid_language(&self, tag: &str) -> bool {
        self.descriptor().supports_language(tag)
    }

    fn supported_languages(&self) -> Vec<String> {
        self.descriptor().languages
    }

    fn supports_silence_detection(&self) -> bool {
        true
    }

    fn set_silence_detection(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.silence_detection.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn supports_recognition_type(&self, kind: RecognitionType) -> bool {
        self.descriptor().supports_recognition_type(kind)
    }

    fn recording_format(&self) -> RecordingFormat {
        RecordingFormat::pcm_s16_mono_16k()
    }

    async fn feed_audio(&self, chunk: AudioChunk) -> Result<(), EngineError> {
        let mut active = self.active.lock().unwrap();
        let request = active.as_mut().ok_or(EngineError::InvalidParameter)?;
        request.fed_bytes += chunk.bytes.len();

        if !request.speech_begun {
            request.speech_begun = true;
            self.send(|s| s.speech_status(SpeechStatus::BeginningOfSpeech));
        }

        let threshold = self.end_of_speech_after.load(Ordering::Relaxed);
        if self.silence_detection.load(Ordering::Relaxed)
            && !request.end_of_speech_sent
            && request.fed_bytes >= threshold
        {
            request.end_of_speech_sent = true;
            self.send(|s| s.speech_status(SpeechStatus::EndOfSpeech));
        }
        Ok(())
    }

    fn result_timing(&self) -> Vec<TokenTiming> {
        self.last_timing.lock().unwrap().clone()
    }

    async fn start(&self, language: &str, kind: RecognitionType) -> Result<(), EngineError> {
        if !self.initialized.load(Ordering::Relaxed) {
            return Err(EngineError::Failed("not initialized".to_string()));
        }
        if !self.is_valid_language(language) {
            return Err(EngineError::InvalidLanguage(language.to_string()));
        }
        if !self.supports_recognition_type(kind) {
            return Err(EngineError::NotSupported);
        }
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Err(EngineError::InvalidParameter);
        }
        *active = Some(ActiveRequest {
            language: language.to_string(),
            fed_bytes: 0,
            speech_begun: false,
            end_of_speech_sent: false,
        });
        self.last_timing.lock().unwrap().clear();
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let request = self
            .active
            .lock()
            .unwrap()
            .take()
            .ok_or(EngineError::InvalidParameter)?;

        let format = self.recording_format();
        let bytes_per_sec =
            format.sample_rate as usize * format.channels as usize * (format.bits_per_sample / 8) as usize;
        let duration_ms = (request.fed_bytes * 1000 / bytes_per_sec.max(1)) as u64;

        let text = format!("[null:{}] {} bytes", request.language, request.fed_bytes);
        *self.last_timing.lock().unwrap() = vec![TokenTiming {
            token: text.clone(),
            start_ms: 0,
            end_ms: duration_ms,
        }];

        tracing::trace!(bytes = request.fed_bytes, "null engine finishing request");
        self.send(|s| {
            s.result(RecognitionResult {
                alternatives: vec![text],
                is_final: true,
                timings: Vec::new(),
            })
        });
        Ok(())
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        *self.active.lock().unwrap() = None;
        self.last_timing.lock().unwrap().clear();
        Ok(())
    }

    fn check_app_agreed(&self, _app_id: &str) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn needs_app_credential(&self) -> bool {
        false
    }

    fn private_data_channel(&self) -> Option<&dyn PrivateDataChannel> {
        Some(self)
    }
}

#[async_trait]
impl PrivateDataChannel for NullEngine {
    async fn set(&self, key: &str, data: &str) -> Result<(), EngineError> {
        self.private
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, EngineError> {
        self.private
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(EngineError::InvalidParameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_trait::EngineEvent;

    fn chunk(len: usize) -> AudioChunk {
        AudioChunk {
            bytes: vec![0u8; len],
            format: RecordingFormat::pcm_s16_mono_16k(),
        }
    }

    async fn ready_engine() -> (NullEngine, tokio::sync::mpsc::UnboundedReceiver<EngineEvent>) {
        let mut engine = NullEngine::new();
        let (sink, rx) = EngineSink::channel();
        engine.set_event_sink(sink);
        engine
            .initialize(toml::Value::Table(Default::default()))
            .await
            .unwrap();
        (engine, rx)
    }

    #[test]
    fn test_descriptor_id() {
        assert_eq!(NullEngine::new().descriptor().id, "null");
    }

    #[tokio::test]
    async fn test_start_requires_initialize() {
        let engine = NullEngine::new();
        let result = engine.start("en-US", RecognitionType::Free).await;
        assert!(matches!(result, Err(EngineError::Failed(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_language() {
        let (engine, _rx) = ready_engine().await;
        let result = engine.start("xx-XX", RecognitionType::Free).await;
        assert!(matches!(result, Err(EngineError::InvalidLanguage(_))));
    }

    #[tokio::test]
    async fn test_stop_reports_fed_bytes() {
        let (engine, mut rx) = ready_engine().await;
        engine.start("en-US", RecognitionType::Free).await.unwrap();
        engine.feed_audio(chunk(640)).await.unwrap();
        engine.stop().await.unwrap();

        // First chunk announces speech
        match rx.try_recv().unwrap() {
            EngineEvent::SpeechStatus(SpeechStatus::BeginningOfSpeech) => {}
            other => panic!("expected beginning-of-speech, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            EngineEvent::Result(r) => {
                assert!(r.alternatives[0].contains("640 bytes"));
                assert!(r.is_final);
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert_eq!(engine.result_timing().len(), 1);
        assert_eq!(engine.result_timing()[0].end_ms, 20);
    }

    #[tokio::test]
    async fn test_end_of_speech_only_with_silence_detection() {
        let (mut engine, mut rx) = ready_engine().await;
        engine.start("en-US", RecognitionType::Free).await.unwrap();
        engine.feed_audio(chunk(DEFAULT_END_OF_SPEECH_BYTES)).await.unwrap();
        // Silence detection off: only beginning-of-speech
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::SpeechStatus(SpeechStatus::BeginningOfSpeech)
        ));
        assert!(rx.try_recv().is_err());

        engine.cancel().await.unwrap();
        engine.set_silence_detection(true).unwrap();
        engine.start("en-US", RecognitionType::Free).await.unwrap();
        engine.feed_audio(chunk(DEFAULT_END_OF_SPEECH_BYTES)).await.unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::SpeechStatus(SpeechStatus::BeginningOfSpeech)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::SpeechStatus(SpeechStatus::EndOfSpeech)
        ));
    }

    #[tokio::test]
    async fn test_cancel_discards_request() {
        let (engine, mut rx) = ready_engine().await;
        engine.start("en-US", RecognitionType::Free).await.unwrap();
        engine.feed_audio(chunk(100)).await.unwrap();
        engine.cancel().await.unwrap();
        assert!(engine.stop().await.is_err());

        // Drain the beginning-of-speech; no result must follow
        let _ = rx.try_recv();
        assert!(rx.try_recv().is_err());
        assert!(engine.result_timing().is_empty());
    }

    #[tokio::test]
    async fn test_private_data_roundtrip() {
        let (engine, _rx) = ready_engine().await;
        let channel = engine.private_data_channel().expect("null supports private data");
        channel.set("mode", "fast").await.unwrap();
        assert_eq!(channel.get("mode").await.unwrap(), "fast");
        assert!(channel.get("missing").await.is_err());
    }

    #[test]
    fn test_null_engine_implements_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullEngine>();
    }
}
