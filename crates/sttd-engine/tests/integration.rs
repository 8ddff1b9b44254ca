use sttd_core::{AudioChunk, RecognitionType, RecordingFormat, SttError};
use sttd_engine::{EngineEvent, EngineRegistry, EngineSink};

#[tokio::test]
async fn test_registry_to_result_flow() {
    let registry = EngineRegistry::new();
    let mut engine = registry.create("null").unwrap();
    let (sink, mut rx) = EngineSink::channel();
    engine.set_event_sink(sink);
    engine
        .initialize(toml::Value::Table(Default::default()))
        .await
        .unwrap();

    engine.start("en-US", RecognitionType::Free).await.unwrap();
    engine
        .feed_audio(AudioChunk {
            bytes: vec![0u8; 320],
            format: RecordingFormat::pcm_s16_mono_16k(),
        })
        .await
        .unwrap();
    engine.stop().await.unwrap();

    let mut saw_result = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Result(r) = event {
            assert!(r.alternatives[0].contains("320 bytes"));
            assert!(r.is_final);
            saw_result = true;
        }
    }
    assert!(saw_result);
}

#[tokio::test]
async fn test_registry_unknown_engine() {
    let registry = EngineRegistry::new();
    match registry.create("missing") {
        Err(SttError::EngineNotAvailable(id)) => assert_eq!(id, "missing"),
        _ => panic!("expected EngineNotAvailable"),
    }
}

#[test]
fn test_descriptor_queries_without_instantiation() {
    let registry = EngineRegistry::new();
    let desc = registry.descriptor("null").unwrap();
    assert!(desc.supports_language("ko-KR"));
    assert!(desc.supports_recognition_type(RecognitionType::Search));
    assert!(desc.supports_silence_detection);
}

#[test]
fn test_settings_override_threshold_validation() {
    // Settings are engine-private TOML; an invalid value is an engine error
    let registry = EngineRegistry::new();
    let mut engine = registry.create("null").unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut table = toml::map::Map::new();
    table.insert(
        "end_of_speech_after_bytes".to_string(),
        toml::Value::Integer(-1),
    );
    let result = rt.block_on(engine.initialize(toml::Value::Table(table)));
    assert!(result.is_err());
}
