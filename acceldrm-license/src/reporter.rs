//! Asynchronous error delivery.
//!
//! Background failures never surface through the foreground API. They land
//! in a single-slot channel that always holds the most recent error, and are
//! forwarded to the optional caller callback as text carrying an
//! `[errCode=N]` token.

use acceldrm_types::{parse_error_code, DrmError, ErrorCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::error;

/// Callback receiving async error messages.
pub type AsyncCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One delivered error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncError {
    pub code: ErrorCode,
    pub message: String,
}

impl AsyncError {
    /// Numeric code recovered from the message token.
    #[must_use]
    pub fn message_code(&self) -> Option<u32> {
        parse_error_code(&self.message)
    }
}

/// Sending side; cheap to clone into background tasks.
#[derive(Clone)]
pub struct AsyncErrorReporter {
    slot: Arc<watch::Sender<Option<AsyncError>>>,
    callback: Option<AsyncCallback>,
}

impl fmt::Debug for AsyncErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncErrorReporter")
            .field("latest", &*self.slot.borrow())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl AsyncErrorReporter {
    pub fn new(callback: Option<AsyncCallback>) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            callback,
        }
    }

    /// Delivers `err`, overwriting any unread value.
    pub fn report(&self, err: &DrmError) {
        let message = err.async_message();
        error!("Async error: {}", message);
        self.slot.send_replace(Some(AsyncError {
            code: err.code(),
            message: message.clone(),
        }));
        if let Some(callback) = &self.callback {
            callback(&message);
        }
    }

    /// Most recent error, read or not.
    #[must_use]
    pub fn latest(&self) -> Option<AsyncError> {
        self.slot.borrow().clone()
    }

    /// Opens an observer that starts with nothing unread.
    #[must_use]
    pub fn subscribe(&self) -> AsyncErrorSlot {
        AsyncErrorSlot {
            rx: self.slot.subscribe(),
        }
    }
}

/// Observer of the async error slot.
#[derive(Debug)]
pub struct AsyncErrorSlot {
    rx: watch::Receiver<Option<AsyncError>>,
}

impl AsyncErrorSlot {
    /// Returns true if an error arrived since the last reset or take.
    #[must_use]
    pub fn was_called(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Most recent error, read or not.
    #[must_use]
    pub fn latest(&self) -> Option<AsyncError> {
        self.rx.borrow().clone()
    }

    /// Returns the unread error, if any, and marks it read.
    pub fn take(&mut self) -> Option<AsyncError> {
        if !self.was_called() {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }

    /// Marks the current value read.
    pub fn reset(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Waits up to `timeout` for the next error.
    pub async fn wait(&mut self, timeout: Duration) -> Option<AsyncError> {
        tokio::time::timeout(timeout, self.rx.changed())
            .await
            .ok()?
            .ok()?;
        self.rx.borrow_and_update().clone()
    }
}
