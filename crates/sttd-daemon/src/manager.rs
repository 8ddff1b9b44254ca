use crate::lease::RecorderLease;
use crate::registry::{Session, SessionRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sttd_core::{
    AudioChunk, DaemonConfig, EngineDescriptor, HandleId, LanguageChanged, RecognitionType,
    SessionEvent, SessionEventKind, SessionState, SpeechStatus, SttError,
};
use sttd_engine::{EngineEvent, EngineRegistry, EngineSink};
use tokio::sync::{broadcast, mpsc};

const LANGUAGE_FEED_CAPACITY: usize = 32;

/// What a client receives when it attaches to the daemon.
pub struct ClientAttachment {
    pub handle: HandleId,
    pub default_engine: String,
    pub default_language: String,
    pub language_rx: broadcast::Receiver<LanguageChanged>,
}

/// Everything the daemon needs to build a session for a handle.
pub struct PrepareRequest {
    pub app_id: String,
    pub engine_id: String,
    /// `None` selects the daemon default language.
    pub language: Option<String>,
    pub recognition_type: RecognitionType,
    pub credential: Option<String>,
    /// The handle's sequenced event channel.
    pub event_tx: mpsc::UnboundedSender<SessionEvent>,
    pub seq: u64,
}

/// The session manager: owns the session table and the single recorder,
/// arbitrates which handle may record, and drives one engine instance per
/// prepared session.
///
/// Asynchronous operations (`prepare`, `start`, `stop`) validate and admit
/// on the caller's path and run the engine off it; completion is observed
/// through the handle's event channel only. `cancel` never waits on the
/// engine.
pub struct SttDaemon {
    engines: EngineRegistry,
    config: DaemonConfig,
    sessions: SessionRegistry,
    recorder: RecorderLease,
    default_language: Mutex<String>,
    language_tx: broadcast::Sender<LanguageChanged>,
    next_handle: AtomicU64,
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SttDaemon {
    pub fn new(engines: EngineRegistry, config: DaemonConfig) -> Self {
        let (language_tx, _) = broadcast::channel(LANGUAGE_FEED_CAPACITY);
        let default_language = config.general.default_language.clone();
        Self {
            engines,
            config,
            sessions: SessionRegistry::new(),
            recorder: RecorderLease::new(),
            default_language: Mutex::new(default_language),
            language_tx,
            next_handle: AtomicU64::new(1),
            init_locks: Mutex::new(HashMap::new()),
        }
    }

    // ---- attachment ----

    pub fn connect(&self, app_id: &str) -> ClientAttachment {
        let handle = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        tracing::info!(%handle, app_id, "client connected");
        ClientAttachment {
            handle,
            default_engine: self.config.general.default_engine.clone(),
            default_language: self.default_language(),
            language_rx: self.language_tx.subscribe(),
        }
    }

    /// Tear the handle's session down from any state.
    pub fn disconnect(&self, handle: HandleId) {
        tracing::info!(%handle, "client disconnected");
        self.teardown(handle);
    }

    // ---- metadata queries ----

    pub fn engines(&self) -> Vec<EngineDescriptor> {
        self.engines.descriptors()
    }

    pub fn engine_exists(&self, engine_id: &str) -> bool {
        self.engines.contains(engine_id)
    }

    pub fn supported_languages(&self, engine_id: &str) -> Result<Vec<String>, SttError> {
        Ok(self.engines.descriptor(engine_id)?.languages.clone())
    }

    pub fn default_language(&self) -> String {
        self.default_language.lock().unwrap().clone()
    }

    /// Swap the daemon default language and notify every connected handle.
    /// State-independent: sessions are not touched.
    pub fn set_default_language(&self, language: &str) {
        let previous = {
            let mut current = self.default_language.lock().unwrap();
            std::mem::replace(&mut *current, language.to_string())
        };
        if previous != language {
            tracing::info!(%previous, current = %language, "default language changed");
            let _ = self.language_tx.send(LanguageChanged {
                previous,
                current: language.to_string(),
            });
        }
    }

    pub fn session_state(&self, handle: HandleId) -> Option<SessionState> {
        self.sessions.state(handle)
    }

    pub fn recorder_holder(&self) -> Option<HandleId> {
        self.recorder.holder()
    }

    // ---- session lifecycle ----

    /// Allocate daemon-side resources for the handle's chosen engine.
    /// Idempotent when the session already exists and is Ready.
    pub async fn prepare(self: &Arc<Self>, handle: HandleId, req: PrepareRequest) -> Result<(), SttError> {
        if let Some(state) = self.sessions.state(handle) {
            return if state == SessionState::Ready {
                Ok(())
            } else {
                Err(SttError::invalid_state(state))
            };
        }

        let mut engine = self.engines.create(&req.engine_id)?;
        let language = req.language.unwrap_or_else(|| self.default_language());
        if !engine.is_valid_language(&language) {
            return Err(SttError::InvalidLanguage(language));
        }
        if engine.needs_app_credential() && req.credential.is_none() {
            return Err(SttError::PermissionDenied("app credential required".to_string()));
        }
        match engine.check_app_agreed(&req.app_id) {
            Ok(true) => {}
            Ok(false) => {
                return Err(SttError::PermissionDenied(format!(
                    "{} has not agreed to engine terms",
                    req.app_id
                )))
            }
            Err(e) => return Err(SttError::from_engine(e)),
        }

        let (sink, sink_rx) = EngineSink::channel();
        engine.set_event_sink(sink);

        // Initialization is serialized per engine id; different engines
        // prepare independently.
        let init_lock = self.init_lock(&req.engine_id);
        {
            let _guard = init_lock.lock().await;
            engine
                .initialize(self.config.engine_settings(&req.engine_id))
                .await
                .map_err(|e| {
                    tracing::warn!(%handle, engine = %req.engine_id, error = %e, "engine initialize failed");
                    SttError::EngineNotAvailable(req.engine_id.clone())
                })?;
        }

        self.sessions.insert(Session {
            handle,
            app_id: req.app_id,
            engine_id: req.engine_id,
            language,
            recognition_type: req.recognition_type,
            state: SessionState::Created,
            silence_detection: false,
            active_seq: req.seq,
            volume_db: -90.0,
            start_sound: None,
            stop_sound: None,
            event_tx: req.event_tx,
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
        });
        self.sessions
            .with(handle, |s| s.transition(SessionState::Ready));
        self.spawn_pump(handle, sink_rx);
        Ok(())
    }

    /// Remove the session. The handle returns to exactly its pre-prepare
    /// standing; a missing session is not an error.
    pub fn unprepare(&self, handle: HandleId) -> Result<(), SttError> {
        match self.sessions.state(handle) {
            None => Ok(()),
            Some(SessionState::Ready) => {
                self.teardown(handle);
                Ok(())
            }
            Some(other) => Err(SttError::invalid_state(other)),
        }
    }

    /// Admit the handle to the recorder. At most one session records
    /// system-wide; a second request fails with `RecorderBusy` instead of
    /// queueing. On admission the engine is started off the caller's path;
    /// the `Recording` transition (or the failure) arrives as an event.
    pub fn start(self: &Arc<Self>, handle: HandleId, seq: u64) -> Result<(), SttError> {
        let (engine, language, kind, start_sound) = self
            .sessions
            .with(handle, |s| {
                if s.state != SessionState::Ready {
                    return Err(SttError::invalid_state(s.state));
                }
                self.recorder.try_acquire(handle)?;
                s.active_seq = seq;
                Ok((
                    Arc::clone(&s.engine),
                    s.language.clone(),
                    s.recognition_type,
                    s.start_sound.clone(),
                ))
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))??;

        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(path) = start_sound {
                // Playback is an external collaborator
                tracing::debug!(%handle, ?path, "start sound requested");
            }
            let outcome = engine.lock().await.start(&language, kind).await;
            match outcome {
                Ok(()) => {
                    daemon.sessions.with(handle, |s| {
                        if s.active_seq == seq && s.state == SessionState::Ready {
                            s.transition(SessionState::Recording);
                        }
                    });
                }
                Err(e) => {
                    daemon.recorder.release(handle);
                    tracing::warn!(%handle, error = %e, "engine start failed");
                    daemon.sessions.with(handle, |s| {
                        if s.active_seq == seq {
                            s.emit(SessionEventKind::Error(SttError::from_engine(e)));
                        }
                    });
                }
            }
        });
        Ok(())
    }

    /// Hand the accumulated audio to the engine and return immediately;
    /// the result arrives later through the event channel.
    pub fn stop(self: &Arc<Self>, handle: HandleId) -> Result<(), SttError> {
        let (engine, stop_sound) = self
            .sessions
            .with(handle, |s| {
                if s.state != SessionState::Recording {
                    return Err(SttError::invalid_state(s.state));
                }
                s.transition(SessionState::Processing);
                Ok((Arc::clone(&s.engine), s.stop_sound.clone()))
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))??;
        self.recorder.release(handle);

        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(path) = stop_sound {
                tracing::debug!(%handle, ?path, "stop sound requested");
            }
            if let Err(e) = engine.lock().await.stop().await {
                tracing::warn!(%handle, error = %e, "engine stop failed");
                daemon.sessions.with(handle, |s| {
                    if s.state == SessionState::Processing {
                        s.emit(SessionEventKind::Error(SttError::from_engine(e)));
                        s.transition(SessionState::Ready);
                    }
                });
            }
        });
        Ok(())
    }

    /// Release the recorder and/or discard in-flight processing. Emits no
    /// events: the client transitioned synchronously, and anything still in
    /// transit for the cancelled request is discarded by its barrier. The
    /// engine's own cancel runs detached so a slow engine cannot block the
    /// caller.
    pub fn cancel(self: &Arc<Self>, handle: HandleId) -> Result<(), SttError> {
        let engine = self
            .sessions
            .with(handle, |s| match s.state {
                SessionState::Recording | SessionState::Processing => {
                    s.state = SessionState::Ready;
                    Ok(Arc::clone(&s.engine))
                }
                other => Err(SttError::invalid_state(other)),
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))??;
        self.recorder.release(handle);

        tokio::spawn(async move {
            if let Err(e) = engine.lock().await.cancel().await {
                tracing::warn!(%handle, error = %e, "engine cancel failed");
            }
        });
        Ok(())
    }

    // ---- recording path ----

    /// Deliver one chunk of captured audio to the session's engine. The
    /// engine's declared format is authoritative; a mismatching chunk is
    /// rejected without reaching the engine.
    pub async fn feed_recording(&self, handle: HandleId, chunk: AudioChunk) -> Result<(), SttError> {
        let engine = self
            .sessions
            .with(handle, |s| {
                if s.state != SessionState::Recording {
                    return Err(SttError::invalid_state(s.state));
                }
                Ok(Arc::clone(&s.engine))
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))??;

        let guard = engine.lock().await;
        let expected = guard.recording_format();
        if chunk.format != expected {
            return Err(SttError::OperationFailed(format!(
                "recording format mismatch: got {:?}, engine requires {:?}",
                chunk.format, expected
            )));
        }
        let db = chunk.volume_db();
        self.sessions.with(handle, |s| s.volume_db = db);
        guard.feed_audio(chunk).await.map_err(SttError::from_engine)
    }

    pub fn recording_volume(&self, handle: HandleId) -> Result<f32, SttError> {
        self.sessions
            .with(handle, |s| {
                if s.state == SessionState::Recording {
                    Ok(s.volume_db)
                } else {
                    Err(SttError::invalid_state(s.state))
                }
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))?
    }

    // ---- Ready-state options ----

    pub async fn set_silence_detection(&self, handle: HandleId, enabled: bool) -> Result<(), SttError> {
        let engine = self.ready_engine(handle)?;
        let mut guard = engine.lock().await;
        if !guard.supports_silence_detection() {
            return Err(SttError::OperationFailed(
                "silence detection not supported by engine".to_string(),
            ));
        }
        guard
            .set_silence_detection(enabled)
            .map_err(SttError::from_engine)?;
        self.sessions.with(handle, |s| s.silence_detection = enabled);
        Ok(())
    }

    pub fn is_recognition_type_supported(
        &self,
        handle: HandleId,
        kind: RecognitionType,
    ) -> Result<bool, SttError> {
        self.sessions
            .with(handle, |s| {
                if s.state != SessionState::Ready {
                    return Err(SttError::invalid_state(s.state));
                }
                Ok(self.engines.descriptor(&s.engine_id)?.supports_recognition_type(kind))
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))?
    }

    pub fn set_start_sound(&self, handle: HandleId, path: Option<PathBuf>) -> Result<(), SttError> {
        self.set_sound(handle, path, true)
    }

    pub fn set_stop_sound(&self, handle: HandleId, path: Option<PathBuf>) -> Result<(), SttError> {
        self.set_sound(handle, path, false)
    }

    fn set_sound(&self, handle: HandleId, path: Option<PathBuf>, start: bool) -> Result<(), SttError> {
        self.sessions
            .with(handle, |s| {
                if s.state != SessionState::Ready {
                    return Err(SttError::invalid_state(s.state));
                }
                if start {
                    s.start_sound = path;
                } else {
                    s.stop_sound = path;
                }
                Ok(())
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))?
    }

    // ---- optional private-data capability ----

    pub async fn set_private_data(&self, handle: HandleId, key: &str, data: &str) -> Result<(), SttError> {
        let engine = self.prepared_engine(handle)?;
        let guard = engine.lock().await;
        match guard.private_data_channel() {
            Some(channel) => channel.set(key, data).await.map_err(SttError::from_engine),
            None => Err(SttError::OperationFailed(
                "private data not supported by engine".to_string(),
            )),
        }
    }

    pub async fn private_data(&self, handle: HandleId, key: &str) -> Result<String, SttError> {
        let engine = self.prepared_engine(handle)?;
        let guard = engine.lock().await;
        match guard.private_data_channel() {
            Some(channel) => channel.get(key).await.map_err(SttError::from_engine),
            None => Err(SttError::OperationFailed(
                "private data not supported by engine".to_string(),
            )),
        }
    }

    // ---- shutdown ----

    pub fn shutdown(&self) {
        for handle in self.sessions.handles() {
            self.teardown(handle);
        }
        tracing::info!("all sessions torn down");
    }

    // ---- internals ----

    fn teardown(&self, handle: HandleId) {
        if let Some(session) = self.sessions.remove(handle) {
            self.recorder.release(handle);
            let engine = session.engine;
            tokio::spawn(async move {
                let _ = engine.lock().await.deinitialize().await;
            });
        }
    }

    fn init_lock(&self, engine_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.init_locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(engine_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn ready_engine(&self, handle: HandleId) -> Result<Arc<tokio::sync::Mutex<Box<dyn sttd_engine::SttEngine>>>, SttError> {
        self.sessions
            .with(handle, |s| {
                if s.state != SessionState::Ready {
                    return Err(SttError::invalid_state(s.state));
                }
                Ok(Arc::clone(&s.engine))
            })
            .ok_or_else(|| SttError::OperationFailed(format!("no session for {handle}")))?
    }

    fn prepared_engine(&self, handle: HandleId) -> Result<Arc<tokio::sync::Mutex<Box<dyn sttd_engine::SttEngine>>>, SttError> {
        self.sessions
            .with(handle, |s| Arc::clone(&s.engine))
            .ok_or_else(|| SttError::invalid_state(SessionState::Created))
    }

    fn spawn_pump(self: &Arc<Self>, handle: HandleId, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                daemon.route_engine_event(handle, event).await;
            }
            tracing::debug!(%handle, "engine event pump stopped");
        });
    }

    /// Map one engine-outbound event onto the session state machine.
    ///
    /// Exactly-once per logical request: terminal events are forwarded only
    /// while the session is in the state that expects them; anything else
    /// (late sends after cancel, duplicate terminals) is dropped here.
    async fn route_engine_event(self: &Arc<Self>, handle: HandleId, event: EngineEvent) {
        match event {
            EngineEvent::SpeechStatus(status) => {
                let auto_stop = self
                    .sessions
                    .with(handle, |s| {
                        if s.state != SessionState::Recording {
                            return false;
                        }
                        s.emit(SessionEventKind::SpeechStatus(status));
                        status == SpeechStatus::EndOfSpeech && s.silence_detection
                    })
                    .unwrap_or(false);
                if auto_stop {
                    tracing::debug!(%handle, "end of speech, auto-stopping");
                    if let Err(e) = self.stop(handle) {
                        tracing::warn!(%handle, error = %e, "auto-stop rejected");
                    }
                }
            }
            EngineEvent::Result(mut result) => {
                if !result.is_final {
                    self.sessions.with(handle, |s| {
                        if matches!(s.state, SessionState::Recording | SessionState::Processing) {
                            s.emit(SessionEventKind::Result(result));
                        }
                    });
                    return;
                }
                let engine = self
                    .sessions
                    .with(handle, |s| {
                        (s.state == SessionState::Processing).then(|| Arc::clone(&s.engine))
                    })
                    .flatten();
                let Some(engine) = engine else {
                    tracing::warn!(%handle, "dropping result outside Processing");
                    return;
                };
                if result.timings.is_empty() {
                    result.timings = engine.lock().await.result_timing();
                }
                // Re-check: a cancel may have landed while fetching timing
                self.sessions.with(handle, |s| {
                    if s.state == SessionState::Processing {
                        s.emit(SessionEventKind::Result(result));
                        s.transition(SessionState::Ready);
                    }
                });
            }
            EngineEvent::Error(e) => {
                let was_recording = self.sessions.with(handle, |s| {
                    if !matches!(s.state, SessionState::Recording | SessionState::Processing) {
                        tracing::debug!(%handle, error = %e, "dropping engine error outside session");
                        return false;
                    }
                    let recording = s.state == SessionState::Recording;
                    s.emit(SessionEventKind::Error(SttError::from_engine(e.clone())));
                    s.transition(SessionState::Ready);
                    recording
                });
                if was_recording.unwrap_or(false) {
                    self.recorder.release(handle);
                }
            }
        }
    }
}
