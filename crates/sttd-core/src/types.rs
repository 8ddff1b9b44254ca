use std::fmt;

/// Identifies one client's session for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stt-{}", self.0)
    }
}

/// Lifecycle state of one session. Exactly one per handle at any time.
///
/// - `Created` -> `Ready` (prepare)
/// - `Ready` -> `Created` (unprepare)
/// - `Ready` -> `Recording` (start)
/// - `Recording` -> `Processing` (stop)
/// - `Recording` -> `Ready` (cancel)
/// - `Processing` -> `Ready` (cancel, result, error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Handle exists; engine selection and callback registration happen here.
    Created,
    /// Daemon-side resources allocated, engine initialized.
    Ready,
    /// This handle holds the recorder and audio is being accumulated.
    Recording,
    /// Audio handed to the engine; waiting for the recognition result.
    Processing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "Created"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Processing => write!(f, "Processing"),
        }
    }
}

impl SessionState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Created, SessionState::Ready)
                | (SessionState::Ready, SessionState::Created)
                | (SessionState::Ready, SessionState::Recording)
                | (SessionState::Recording, SessionState::Processing)
                // Cancel / terminal transitions
                | (SessionState::Recording, SessionState::Ready)
                | (SessionState::Processing, SessionState::Ready)
        )
    }
}

/// Kind of recognition a client asks for. Engines declare the subset they
/// support in their [`EngineDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionType {
    /// Free-form dictation, final result only.
    Free,
    /// Free-form dictation with partial results.
    FreePartial,
    Search,
    WebSearch,
}

impl fmt::Display for RecognitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionType::Free => write!(f, "free"),
            RecognitionType::FreePartial => write!(f, "free-partial"),
            RecognitionType::Search => write!(f, "search"),
            RecognitionType::WebSearch => write!(f, "web-search"),
        }
    }
}

/// PCM format an engine requires for recording data. Declared by the engine
/// and authoritative: chunks in any other format are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl RecordingFormat {
    /// 16 kHz mono s16le, the common engine default.
    pub fn pcm_s16_mono_16k() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// A slice of captured audio, tagged with the format it was captured in.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub format: RecordingFormat,
}

impl AudioChunk {
    /// Peak level of this chunk in dBFS. Silence floors at -90.0.
    ///
    /// Only 8- and 16-bit PCM are interpreted; other depths report the floor.
    pub fn volume_db(&self) -> f32 {
        let peak: f32 = match self.format.bits_per_sample {
            16 => self
                .bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs() as f32 / i16::MAX as f32)
                .fold(0.0, f32::max),
            8 => self
                .bytes
                .iter()
                .map(|&b| (b as i16 - 128).unsigned_abs() as f32 / 127.0)
                .fold(0.0, f32::max),
            _ => 0.0,
        };
        if peak <= 0.0 {
            -90.0
        } else {
            (20.0 * peak.log10()).max(-90.0)
        }
    }
}

/// Start/end offsets for one recognized token, relative to the utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTiming {
    pub token: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Outcome of one completed recognition. Immutable once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Recognized text alternatives, best first.
    pub alternatives: Vec<String>,
    /// `false` for partial results during `FreePartial` recognition.
    pub is_final: bool,
    /// Optional per-token timing, as reported by the engine.
    pub timings: Vec<TokenTiming>,
}

/// Static engine metadata supplied at registration. Read-only to the daemon.
#[derive(Debug, Clone)]
pub struct EngineDescriptor {
    pub id: String,
    pub display_name: String,
    /// Locale-style language tags, e.g. "en-US".
    pub languages: Vec<String>,
    pub recognition_types: Vec<RecognitionType>,
    pub supports_silence_detection: bool,
}

impl EngineDescriptor {
    pub fn supports_language(&self, tag: &str) -> bool {
        self.languages.iter().any(|l| l == tag)
    }

    pub fn supports_recognition_type(&self, kind: RecognitionType) -> bool {
        self.recognition_types.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Created.can_transition_to(SessionState::Ready));
        assert!(SessionState::Ready.can_transition_to(SessionState::Recording));
        assert!(SessionState::Recording.can_transition_to(SessionState::Processing));
        assert!(SessionState::Processing.can_transition_to(SessionState::Ready));
        assert!(SessionState::Recording.can_transition_to(SessionState::Ready));

        assert!(!SessionState::Created.can_transition_to(SessionState::Recording));
        assert!(!SessionState::Processing.can_transition_to(SessionState::Recording));
        assert!(!SessionState::Created.can_transition_to(SessionState::Processing));
    }

    #[test]
    fn test_volume_db_silence_floors() {
        let chunk = AudioChunk {
            bytes: vec![0u8; 320],
            format: RecordingFormat::pcm_s16_mono_16k(),
        };
        assert_eq!(chunk.volume_db(), -90.0);
    }

    #[test]
    fn test_volume_db_full_scale_is_zero() {
        let sample = i16::MAX.to_le_bytes();
        let chunk = AudioChunk {
            bytes: sample.repeat(100),
            format: RecordingFormat::pcm_s16_mono_16k(),
        };
        assert!(chunk.volume_db().abs() < 0.01);
    }

    #[test]
    fn test_descriptor_language_lookup() {
        let desc = EngineDescriptor {
            id: "null".to_string(),
            display_name: "Null".to_string(),
            languages: vec!["en-US".to_string(), "ko-KR".to_string()],
            recognition_types: vec![RecognitionType::Free],
            supports_silence_detection: true,
        };
        assert!(desc.supports_language("en-US"));
        assert!(!desc.supports_language("fr-FR"));
        assert!(desc.supports_recognition_type(RecognitionType::Free));
        assert!(!desc.supports_recognition_type(RecognitionType::Search));
    }

    #[test]
    fn test_handle_id_display() {
        assert_eq!(HandleId(7).to_string(), "stt-7");
    }
}
