//! Controller Facade
//!
//! [`LinkController`] is the public surface the host application talks to.
//! Every operation is non-blocking: commands are queued to the connection
//! driver, messages are deposited into the outbox, pause/resume toggle the
//! run-control flag.

use crate::domain::models::LinkStatus;
use crate::infrastructure::bluetooth::connection::{
    Command, ConnectionDriver, LinkConfig, SharedLinkState,
};
use crate::infrastructure::bluetooth::outbox::Outbox;
use crate::infrastructure::bluetooth::platform::{BlePlatform, PlatformEvent};
use crate::infrastructure::bluetooth::transmitter::Transmitter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// One controller per target peripheral identity.
pub struct LinkController {
    commands: mpsc::UnboundedSender<Command>,
    outbox: Arc<Outbox>,
    shared: Arc<SharedLinkState>,
    platform: Arc<dyn BlePlatform>,
    paused: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker: Mutex<JoinHandle<()>>,
}

impl LinkController {
    /// Spawn the connection driver and the transmitter worker and return
    /// the facade. `events` is the platform's callback channel.
    pub fn start(
        platform: Arc<dyn BlePlatform>,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
        config: LinkConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(SharedLinkState::new());
        let outbox = Arc::new(Outbox::new());
        let paused = Arc::new(AtomicBool::new(false));

        let driver = ConnectionDriver::new(
            Arc::clone(&platform),
            Arc::clone(&shared),
            config,
            events,
            command_rx,
            command_tx.clone(),
        );
        tokio::spawn(driver.run());

        let worker = Transmitter::spawn(
            Arc::clone(&outbox),
            Arc::clone(&shared),
            Arc::clone(&platform),
            Arc::clone(&paused),
            shutdown_rx.clone(),
        );

        Self {
            commands: command_tx,
            outbox,
            shared,
            platform,
            paused,
            shutdown_tx,
            shutdown_rx,
            worker: Mutex::new(worker),
        }
    }

    /// Disconnect when linked, otherwise start scanning. Idempotent while a
    /// scan is already running.
    pub fn switch_connection(&self) {
        let _ = self.commands.send(Command::SwitchConnection);
    }

    /// Deposit a message for transmission. Last write wins; there is no
    /// delivery confirmation.
    pub fn send_message(&self, text: impl Into<String>) {
        let text = text.into();
        info!(message = %text, "Message queued");
        self.outbox.deposit(text);
    }

    /// Stop performing writes. Messages deposited while paused are dropped
    /// when inspected; the link itself stays up.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Transmitter paused");
    }

    /// Allow writes again, respawning the worker if it has exited.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("Transmitter resumed");

        let mut worker = self.worker.lock().expect("worker mutex poisoned");
        if worker.is_finished() {
            *worker = Transmitter::spawn(
                Arc::clone(&self.outbox),
                Arc::clone(&self.shared),
                Arc::clone(&self.platform),
                Arc::clone(&self.paused),
                self.shutdown_rx.clone(),
            );
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Current connection state snapshot for the host application.
    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    /// Tear down: stops the driver (which disconnects any active link) and
    /// the transmitter worker.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.commands.send(Command::Shutdown);
        info!("Controller shutdown requested");
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.commands.send(Command::Shutdown);
    }
}
