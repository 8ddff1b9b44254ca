pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::DaemonConfig;
pub use error::{ConfigError, EngineError, SttError};
pub use events::{LanguageChanged, SessionEvent, SessionEventKind, SpeechStatus};
pub use types::{
    AudioChunk, EngineDescriptor, HandleId, RecognitionResult, RecognitionType, RecordingFormat,
    SessionState, TokenTiming,
};
