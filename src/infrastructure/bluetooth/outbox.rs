//! Message Outbox
//!
//! A single-slot mailbox: the freshest message wins, older unconsumed
//! messages are silently replaced. The transmitter blocks on [`Outbox::ready`]
//! instead of polling.

use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
pub struct Outbox {
    slot: Mutex<Option<String>>,
    available: Notify,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `text`, replacing any unconsumed prior value, and wake the
    /// consumer.
    pub fn deposit(&self, text: String) {
        let replaced = self
            .slot
            .lock()
            .expect("outbox mutex poisoned")
            .replace(text);
        if let Some(dropped) = replaced {
            trace!(dropped = %dropped, "outbox slot overwritten");
        }
        self.available.notify_one();
    }

    /// Remove and return the pending message, if any.
    pub fn take(&self) -> Option<String> {
        self.slot.lock().expect("outbox mutex poisoned").take()
    }

    /// Wait until a deposit happens. A deposit that raced ahead of the wait
    /// is not lost: `Notify` stores the permit.
    pub async fn ready(&self) {
        self.available.notified().await;
    }
}
