//! BLE Scanner Module
//!
//! Drives platform device discovery for the target peripheral and schedules
//! the automatic scan stop.

use crate::infrastructure::bluetooth::connection::Command;
use crate::infrastructure::bluetooth::platform::{BlePlatform, PlatformError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Starts and stops platform discovery on behalf of the connection driver.
///
/// Each scan gets a generation number; the timeout task posts it back so a
/// timeout for a scan that already stopped (match found, or a fresh scan
/// started) is ignored.
pub struct BleScanner {
    platform: Arc<dyn BlePlatform>,
    commands: mpsc::UnboundedSender<Command>,
    timeout: Duration,
    generation: u64,
    scanning: bool,
}

impl BleScanner {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        commands: mpsc::UnboundedSender<Command>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            commands,
            timeout,
            generation: 0,
            scanning: false,
        }
    }

    /// Start scanning. Idempotent: a second start while scanning is a no-op.
    pub async fn start(&mut self) -> Result<(), PlatformError> {
        if self.scanning {
            return Ok(());
        }

        self.platform.start_discovery().await?;
        self.scanning = true;
        self.generation += 1;
        info!(timeout_ms = self.timeout.as_millis() as u64, "Start scanning");

        let generation = self.generation;
        let commands = self.commands.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::ScanTimeout { generation });
        });

        Ok(())
    }

    /// Stop scanning immediately.
    pub async fn stop(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        if let Err(e) = self.platform.stop_discovery().await {
            warn!(error = %e, "Failed to stop discovery");
        }
        info!("Stop scanning");
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// True when `generation` refers to the scan currently in progress.
    pub fn is_current(&self, generation: u64) -> bool {
        self.scanning && generation == self.generation
    }
}
