use crate::handle::ClientInner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sttd_core::{LanguageChanged, SessionEvent, SessionEventKind, SessionState};
use tokio::sync::{broadcast, mpsc};

/// Per-handle event loop: applies sequenced session events to the handle
/// and invokes the application's registered callbacks.
///
/// Ordering: events traverse one mpsc channel in completion order, so for a
/// single start/stop cycle speech-status precedes the terminal
/// result/error, which precedes the state-changed reflecting the resulting
/// state. Events whose sequence number predates the handle's barrier (a
/// `cancel`) are discarded. The unsolicited language feed is handled on a
/// separate branch and is never filtered.
pub(crate) fn spawn(
    inner: Arc<ClientInner>,
    mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    mut language_rx: broadcast::Receiver<LanguageChanged>,
) {
    tokio::spawn(async move {
        let mut language_open = true;
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => deliver(&inner, event),
                    None => break,
                },
                change = language_rx.recv(), if language_open => match change {
                    Ok(change) => deliver_language(&inner, change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(handle = %inner.handle, skipped, "language feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        language_open = false;
                    }
                },
            }
        }
        tracing::debug!(handle = %inner.handle, "dispatcher stopped");
    });
}

fn deliver(inner: &ClientInner, event: SessionEvent) {
    if event.seq < inner.barrier.load(Ordering::Acquire) {
        tracing::trace!(handle = %inner.handle, seq = event.seq, "discarding stale event");
        return;
    }
    match event.kind {
        SessionEventKind::StateChanged { previous, current } => {
            *inner.state.lock().unwrap() = current;
            if previous == SessionState::Created {
                inner.pending_prepare.store(false, Ordering::Release);
            }
            let cb = inner.callbacks.lock().unwrap().state_changed.clone();
            if let Some(cb) = cb {
                cb(previous, current);
            }
        }
        SessionEventKind::Result(result) => {
            // The result is current for exactly the duration of its
            // callback; foreach_detailed_result reads it from there.
            *inner.current_result.lock().unwrap() = Some(result.clone());
            let cb = inner.callbacks.lock().unwrap().result.clone();
            if let Some(cb) = cb {
                cb(&result);
            }
            *inner.current_result.lock().unwrap() = None;
        }
        SessionEventKind::Error(err) => {
            if *inner.state.lock().unwrap() == SessionState::Created {
                // A failed prepare leaves the handle where it was
                inner.pending_prepare.store(false, Ordering::Release);
            }
            let cb = inner.callbacks.lock().unwrap().error.clone();
            if let Some(cb) = cb {
                cb(&err);
            }
        }
        SessionEventKind::SpeechStatus(status) => {
            let cb = inner.callbacks.lock().unwrap().speech_status.clone();
            if let Some(cb) = cb {
                cb(status);
            }
        }
    }
}

fn deliver_language(inner: &ClientInner, change: LanguageChanged) {
    let cb = inner.callbacks.lock().unwrap().language_changed.clone();
    if let Some(cb) = cb {
        cb(&change.previous, &change.current);
    }
}
