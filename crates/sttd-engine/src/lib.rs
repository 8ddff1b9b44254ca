pub mod engine_trait;
pub mod null_engine;
pub mod registry;

pub use engine_trait::{EngineEvent, EngineSink, PrivateDataChannel, SttEngine};
pub use null_engine::NullEngine;
pub use registry::EngineRegistry;
