//! The server side's single push session slot.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use http::Response;

use crate::cache::CacheKey;
use crate::http::body::Body;
use crate::observability::metrics;
use crate::push::mux::MuxSession;
use crate::push::sender::{PushError, PushSender};

/// Holds at most one push session at a time.
///
/// Readers load the current sender lock-free. Installing a session closes
/// the previous one first, so anything still using it fails promptly
/// instead of writing into a connection nobody reads.
pub struct PushChannel {
    current: ArcSwapOption<PushSender>,
    replace_lock: Mutex<()>,
}

impl PushChannel {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            replace_lock: Mutex::new(()),
        }
    }

    /// Install `session` as the push session, closing any previous one.
    pub fn replace(&self, session: Arc<dyn MuxSession>) {
        let _guard = self
            .replace_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = self.current.load_full() {
            old.close();
            tracing::info!("Closed previous push session");
        }
        self.current.store(Some(Arc::new(PushSender::new(session))));
        tracing::info!("Push session installed");
    }

    /// The current sender, if a live session is installed.
    pub fn current(&self) -> Option<Arc<PushSender>> {
        self.current.load_full().filter(|sender| !sender.is_closed())
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Close and remove the current session.
    pub fn close(&self) {
        let _guard = self
            .replace_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = self.current.swap(None) {
            old.close();
        }
    }

    /// Push over the current session.
    pub async fn push(&self, key: &CacheKey, response: Response<Body>) -> Result<u64, PushError> {
        let Some(sender) = self.current() else {
            metrics::record_push_sent("no_session");
            return Err(PushError::NoSession);
        };
        match sender.push(key, response).await {
            Ok(bytes) => {
                metrics::record_push_sent("sent");
                Ok(bytes)
            }
            Err(e) => {
                metrics::record_push_sent("failed");
                Err(e)
            }
        }
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new()
    }
}
