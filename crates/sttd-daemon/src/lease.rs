use std::sync::{Arc, Mutex};
use sttd_core::{HandleId, SttError};

/// Exclusive ownership token over the single physical recorder.
///
/// Exactly one handle may hold the lease at a time; acquisition fails fast
/// with `RecorderBusy` instead of queueing. Release is holder-checked and
/// idempotent.
#[derive(Clone)]
pub struct RecorderLease {
    holder: Arc<Mutex<Option<HandleId>>>,
}

impl RecorderLease {
    pub fn new() -> Self {
        Self {
            holder: Arc::new(Mutex::new(None)),
        }
    }

    pub fn try_acquire(&self, handle: HandleId) -> Result<(), SttError> {
        let mut holder = self.holder.lock().unwrap();
        match *holder {
            None => {
                *holder = Some(handle);
                tracing::debug!(%handle, "recorder lease acquired");
                Ok(())
            }
            Some(current) if current == handle => Ok(()),
            Some(current) => {
                tracing::debug!(%handle, held_by = %current, "recorder busy");
                Err(SttError::RecorderBusy)
            }
        }
    }

    /// Release the lease if `handle` holds it; a release by a non-holder
    /// is ignored.
    pub fn release(&self, handle: HandleId) {
        let mut holder = self.holder.lock().unwrap();
        if *holder == Some(handle) {
            *holder = None;
            tracing::debug!(%handle, "recorder lease released");
        }
    }

    pub fn holder(&self) -> Option<HandleId> {
        *self.holder.lock().unwrap()
    }
}

impl Default for RecorderLease {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_exclusive() {
        let lease = RecorderLease::new();
        lease.try_acquire(HandleId(1)).unwrap();
        assert_eq!(lease.try_acquire(HandleId(2)), Err(SttError::RecorderBusy));
        assert_eq!(lease.holder(), Some(HandleId(1)));
    }

    #[test]
    fn test_lease_reacquire_by_holder_is_ok() {
        let lease = RecorderLease::new();
        lease.try_acquire(HandleId(1)).unwrap();
        assert!(lease.try_acquire(HandleId(1)).is_ok());
    }

    #[test]
    fn test_lease_release_frees_recorder() {
        let lease = RecorderLease::new();
        lease.try_acquire(HandleId(1)).unwrap();
        lease.release(HandleId(1));
        assert_eq!(lease.holder(), None);
        assert!(lease.try_acquire(HandleId(2)).is_ok());
    }

    #[test]
    fn test_lease_release_by_non_holder_is_ignored() {
        let lease = RecorderLease::new();
        lease.try_acquire(HandleId(1)).unwrap();
        lease.release(HandleId(2));
        assert_eq!(lease.holder(), Some(HandleId(1)));
    }

    #[test]
    fn test_lease_release_is_idempotent() {
        let lease = RecorderLease::new();
        lease.try_acquire(HandleId(1)).unwrap();
        lease.release(HandleId(1));
        lease.release(HandleId(1));
        assert_eq!(lease.holder(), None);
    }
}
