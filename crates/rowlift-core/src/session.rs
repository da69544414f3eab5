//! Upload session registry
//!
//! Process-wide map of cancellation signals keyed by opaque upload id. This
//! is the only state shared across concurrent uploads: at most one signal
//! exists per id at any instant, re-registration overwrites the prior
//! signal, and removal is idempotent so a cancel racing with natural
//! completion is safe.
//!
//! Cancellation is cooperative and monotonic: once a token is tripped every
//! later checkpoint for that session observes it. Callers wanting a timeout
//! cancel the signal after a deadline; there is no separate clock here.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::errors::UploadError;

/// Registry of live upload sessions. Construct once at process start and
/// share by reference; sessions deregister themselves when their pipeline
/// finishes, fails or is cancelled.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh cancellation token for `upload_id`, overwriting any
    /// prior signal for the same id (no queuing). Returns the new token.
    pub fn register(&self, upload_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(upload_id.to_string(), token.clone());
        token
    }

    /// Trip the signal for `upload_id`. Fails with `UnknownUpload` when no
    /// session is registered; that is the caller-visible sign the id was
    /// invalid or the upload already finished.
    pub fn cancel(&self, upload_id: &str) -> Result<(), UploadError> {
        match self.lock().get(upload_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            },
            None => Err(UploadError::UnknownUpload(upload_id.to_string())),
        }
    }

    /// Deregister the session. Idempotent.
    pub fn remove(&self, upload_id: &str) {
        self.lock().remove(upload_id);
    }

    pub fn get(&self, upload_id: &str) -> Option<CancellationToken> {
        self.lock().get(upload_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        // A poisoned lock only means another pipeline panicked; the map
        // itself is still usable.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
