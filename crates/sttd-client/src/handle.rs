use crate::callbacks::CallbackRegistry;
use crate::dispatcher;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sttd_core::{
    EngineDescriptor, HandleId, RecognitionResult, RecognitionType, SessionEvent,
    SessionEventKind, SessionState, SpeechStatus, SttError,
};
use sttd_daemon::{PrepareRequest, SttDaemon};
use tokio::sync::mpsc;

pub(crate) struct ClientInner {
    pub(crate) handle: HandleId,
    pub(crate) app_id: String,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) engine_id: Mutex<String>,
    pub(crate) language: Mutex<Option<String>>,
    pub(crate) recognition_type: Mutex<RecognitionType>,
    pub(crate) credential: Mutex<Option<String>>,
    pub(crate) callbacks: Mutex<CallbackRegistry>,
    /// Events below this sequence number belong to cancelled requests and
    /// are discarded on arrival.
    pub(crate) barrier: AtomicU64,
    pub(crate) next_seq: AtomicU64,
    pub(crate) pending_prepare: AtomicBool,
    /// `None` once disconnected; dropping the last sender stops the
    /// dispatcher.
    pub(crate) event_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    /// Set for exactly the duration of the result callback.
    pub(crate) current_result: Mutex<Option<RecognitionResult>>,
}

impl ClientInner {
    fn local_event(&self, kind: SessionEventKind) {
        let seq = self.barrier.load(Ordering::Acquire);
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(SessionEvent { seq, kind });
        }
    }
}

/// One application's speech session: the client-side state machine and
/// command surface.
///
/// Every command is either rejected with `InvalidState` (no transition, no
/// side effect) or accepted against the state it is legal from. The
/// asynchronous commands (`prepare`, `start`, `stop`) return after
/// submission/admission; their completion is observed only through the
/// registered callbacks. Requires a tokio runtime.
#[derive(Clone)]
pub struct SttClient {
    daemon: Arc<SttDaemon>,
    inner: Arc<ClientInner>,
}

impl SttClient {
    /// Create a handle in `Created` and attach it to the daemon.
    pub fn connect(daemon: &Arc<SttDaemon>, app_id: &str) -> Self {
        let attachment = daemon.connect(app_id);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            handle: attachment.handle,
            app_id: app_id.to_string(),
            state: Mutex::new(SessionState::Created),
            engine_id: Mutex::new(attachment.default_engine),
            language: Mutex::new(None),
            recognition_type: Mutex::new(RecognitionType::Free),
            credential: Mutex::new(None),
            callbacks: Mutex::new(CallbackRegistry::default()),
            barrier: AtomicU64::new(0),
            next_seq: AtomicU64::new(1),
            pending_prepare: AtomicBool::new(false),
            event_tx: Mutex::new(Some(event_tx)),
            current_result: Mutex::new(None),
        });
        dispatcher::spawn(Arc::clone(&inner), event_rx, attachment.language_rx);
        tracing::debug!(handle = %inner.handle, app_id, "handle created");
        Self {
            daemon: Arc::clone(daemon),
            inner,
        }
    }

    pub fn handle(&self) -> HandleId {
        self.inner.handle
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    fn require(&self, allowed: &[SessionState]) -> Result<SessionState, SttError> {
        let current = self.state();
        if allowed.contains(&current) {
            Ok(current)
        } else {
            Err(SttError::invalid_state(current))
        }
    }

    // ---- Created: selection ----

    pub fn set_engine(&self, engine_id: &str) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        if !self.daemon.engine_exists(engine_id) {
            return Err(SttError::EngineNotAvailable(engine_id.to_string()));
        }
        *self.inner.engine_id.lock().unwrap() = engine_id.to_string();
        Ok(())
    }

    pub fn engine(&self) -> Result<String, SttError> {
        self.require(&[SessionState::Created])?;
        Ok(self.inner.engine_id.lock().unwrap().clone())
    }

    pub fn foreach_supported_engines(
        &self,
        mut f: impl FnMut(&EngineDescriptor),
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        for descriptor in self.daemon.engines() {
            f(&descriptor);
        }
        Ok(())
    }

    /// Select the recognition language. Unset, the daemon default applies;
    /// validated against the engine at `prepare`.
    pub fn set_language(&self, tag: &str) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        *self.inner.language.lock().unwrap() = Some(tag.to_string());
        Ok(())
    }

    pub fn set_recognition_type(&self, kind: RecognitionType) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        *self.inner.recognition_type.lock().unwrap() = kind;
        Ok(())
    }

    /// Credential handed to the engine's permission check at `prepare`.
    pub fn set_credential(&self, credential: &str) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        *self.inner.credential.lock().unwrap() = Some(credential.to_string());
        Ok(())
    }

    // ---- Created: callback registration ----

    pub fn set_result_cb(
        &self,
        cb: impl Fn(&RecognitionResult) + Send + Sync + 'static,
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().result = Some(Arc::new(cb));
        Ok(())
    }

    pub fn unset_result_cb(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().result = None;
        Ok(())
    }

    pub fn set_error_cb(
        &self,
        cb: impl Fn(&SttError) + Send + Sync + 'static,
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().error = Some(Arc::new(cb));
        Ok(())
    }

    pub fn unset_error_cb(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().error = None;
        Ok(())
    }

    pub fn set_state_changed_cb(
        &self,
        cb: impl Fn(SessionState, SessionState) + Send + Sync + 'static,
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().state_changed = Some(Arc::new(cb));
        Ok(())
    }

    pub fn unset_state_changed_cb(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().state_changed = None;
        Ok(())
    }

    pub fn set_default_language_changed_cb(
        &self,
        cb: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().language_changed = Some(Arc::new(cb));
        Ok(())
    }

    pub fn unset_default_language_changed_cb(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().language_changed = None;
        Ok(())
    }

    pub fn set_speech_status_cb(
        &self,
        cb: impl Fn(SpeechStatus) + Send + Sync + 'static,
    ) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().speech_status = Some(Arc::new(cb));
        Ok(())
    }

    pub fn unset_speech_status_cb(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        self.inner.callbacks.lock().unwrap().speech_status = None;
        Ok(())
    }

    // ---- lifecycle ----

    /// Submit the handle for preparation. Completion (`Ready`) or failure
    /// arrives through the callbacks; a failure leaves the handle
    /// `Created`. Resubmission while a prepare is in flight is a no-op.
    pub fn prepare(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Created])?;
        if self.inner.pending_prepare.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::AcqRel);
        let Some(event_tx) = self.inner.event_tx.lock().unwrap().clone() else {
            return Err(SttError::OperationFailed("handle disconnected".to_string()));
        };
        let req = PrepareRequest {
            app_id: self.inner.app_id.clone(),
            engine_id: self.inner.engine_id.lock().unwrap().clone(),
            language: self.inner.language.lock().unwrap().clone(),
            recognition_type: *self.inner.recognition_type.lock().unwrap(),
            credential: self.inner.credential.lock().unwrap().clone(),
            event_tx: event_tx.clone(),
            seq,
        };
        let daemon = Arc::clone(&self.daemon);
        let handle = self.inner.handle;
        tokio::spawn(async move {
            if let Err(e) = daemon.prepare(handle, req).await {
                tracing::debug!(%handle, error = %e, "prepare failed");
                let _ = event_tx.send(SessionEvent {
                    seq,
                    kind: SessionEventKind::Error(e),
                });
            }
        });
        Ok(())
    }

    /// Release daemon-side resources; returns the handle to exactly its
    /// pre-prepare standing.
    pub fn unprepare(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon.unprepare(self.inner.handle)?;
        *self.inner.state.lock().unwrap() = SessionState::Created;
        self.inner.local_event(SessionEventKind::StateChanged {
            previous: SessionState::Ready,
            current: SessionState::Created,
        });
        Ok(())
    }

    /// Request the recorder. `RecorderBusy` (another session is recording)
    /// and admission illegality come back synchronously; the `Recording`
    /// transition or an engine failure arrives through the callbacks.
    pub fn start(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        let seq = self.inner.next_seq.fetch_add(1, Ordering::AcqRel);
        self.daemon.start(self.inner.handle, seq)
    }

    /// End capture and hand the audio to the engine; the result arrives
    /// through the result callback.
    pub fn stop(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Recording])?;
        self.daemon.stop(self.inner.handle)
    }

    /// Forced synchronous return to `Ready`. Any result or error already in
    /// transit for the cancelled request is discarded; the daemon-side
    /// release runs detached, so a slow engine cannot delay this call.
    pub fn cancel(&self) -> Result<(), SttError> {
        let previous = self.require(&[SessionState::Recording, SessionState::Processing])?;
        let barrier = self.inner.next_seq.fetch_add(1, Ordering::AcqRel);
        self.inner.barrier.store(barrier, Ordering::Release);
        *self.inner.state.lock().unwrap() = SessionState::Ready;
        if let Err(e) = self.daemon.cancel(self.inner.handle) {
            tracing::debug!(handle = %self.inner.handle, error = %e, "daemon-side cancel rejected");
        }
        self.inner.local_event(SessionEventKind::StateChanged {
            previous,
            current: SessionState::Ready,
        });
        Ok(())
    }

    // ---- Ready: options ----

    pub async fn set_silence_detection(&self, enabled: bool) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon
            .set_silence_detection(self.inner.handle, enabled)
            .await
    }

    pub fn is_recognition_type_supported(&self, kind: RecognitionType) -> Result<bool, SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon
            .is_recognition_type_supported(self.inner.handle, kind)
    }

    pub fn set_start_sound(&self, path: impl Into<PathBuf>) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon
            .set_start_sound(self.inner.handle, Some(path.into()))
    }

    pub fn unset_start_sound(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon.set_start_sound(self.inner.handle, None)
    }

    pub fn set_stop_sound(&self, path: impl Into<PathBuf>) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon
            .set_stop_sound(self.inner.handle, Some(path.into()))
    }

    pub fn unset_stop_sound(&self) -> Result<(), SttError> {
        self.require(&[SessionState::Ready])?;
        self.daemon.set_stop_sound(self.inner.handle, None)
    }

    // ---- Recording ----

    /// Last volume estimate of the capture path, in dBFS.
    pub fn recording_volume(&self) -> Result<f32, SttError> {
        self.require(&[SessionState::Recording])?;
        self.daemon.recording_volume(self.inner.handle)
    }

    // ---- Processing ----

    /// Walk the text alternatives of the result currently being delivered.
    /// Legal only inside the result callback; `f` returning `false` stops
    /// the walk.
    pub fn foreach_detailed_result(
        &self,
        mut f: impl FnMut(usize, &str) -> bool,
    ) -> Result<(), SttError> {
        let state = self.state();
        let result = self.inner.current_result.lock().unwrap();
        match (result.as_ref(), state) {
            (Some(result), SessionState::Processing) => {
                for (index, text) in result.alternatives.iter().enumerate() {
                    if !f(index, text) {
                        break;
                    }
                }
                Ok(())
            }
            _ => Err(SttError::invalid_state(state)),
        }
    }

    // ---- any state ----

    pub fn foreach_supported_languages(&self, mut f: impl FnMut(&str)) -> Result<(), SttError> {
        let engine_id = self.inner.engine_id.lock().unwrap().clone();
        for language in self.daemon.supported_languages(&engine_id)? {
            f(&language);
        }
        Ok(())
    }

    pub fn default_language(&self) -> String {
        self.daemon.default_language()
    }

    /// Tear the session down from any state and detach from the daemon.
    pub fn disconnect(self) {
        if matches!(
            self.state(),
            SessionState::Recording | SessionState::Processing
        ) {
            let _ = self.cancel();
        }
        self.daemon.disconnect(self.inner.handle);
        // Break potential handler -> handle reference cycles
        self.inner.callbacks.lock().unwrap().clear();
        *self.inner.event_tx.lock().unwrap() = None;
        tracing::debug!(handle = %self.inner.handle, "handle destroyed");
    }
}
