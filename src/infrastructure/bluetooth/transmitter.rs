//! Transmitter Loop
//!
//! The background worker that drains the outbox and performs fire-and-forget
//! writes to the resolved characteristic. Best effort: a message observed
//! while the link is not ready, or while paused, is dropped and logged.

use crate::infrastructure::bluetooth::connection::SharedLinkState;
use crate::infrastructure::bluetooth::outbox::Outbox;
use crate::infrastructure::bluetooth::platform::{BlePlatform, WriteMode};
use crate::infrastructure::bluetooth::protocol;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Transmitter {
    outbox: Arc<Outbox>,
    shared: Arc<SharedLinkState>,
    platform: Arc<dyn BlePlatform>,
    paused: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Transmitter {
    /// Spawn the worker task. The task blocks on the outbox between
    /// messages and exits when the shutdown flag flips.
    pub fn spawn(
        outbox: Arc<Outbox>,
        shared: Arc<SharedLinkState>,
        platform: Arc<dyn BlePlatform>,
        paused: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let transmitter = Self {
            outbox,
            shared,
            platform,
            paused,
            shutdown,
        };
        tokio::spawn(transmitter.run())
    }

    async fn run(mut self) {
        loop {
            while let Some(text) = self.outbox.take() {
                self.dispatch(text).await;
            }

            tokio::select! {
                _ = self.outbox.ready() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// The slot was already cleared by the take; every exit path below is a
    /// drop except a successful submission.
    async fn dispatch(&self, text: String) {
        if self.paused.load(Ordering::SeqCst) {
            info!(message = %text, "Transmitter paused, message dropped");
            return;
        }

        let payload = protocol::frame_message(&text);

        let Some((link, characteristic)) = self.shared.write_target() else {
            warn!(message = %text, "No ready link, message dropped");
            return;
        };

        match self
            .platform
            .write_characteristic(
                link,
                characteristic.service,
                characteristic.uuid,
                &payload,
                WriteMode::WithoutResponse,
            )
            .await
        {
            Ok(()) => info!(bytes = payload.len(), "Write submitted"),
            Err(e) => warn!(error = %e, "Write submission failed, message dropped"),
        }
    }
}
