//! BLE Connection Module
//!
//! The connection state machine: reacts to platform callbacks and facade
//! commands, owns the active link, and resolves the target
//! service/characteristic pair.

use crate::domain::models::{ConnectionState, LinkStatus};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::platform::{
    BlePlatform, DiscoveryStatus, GattService, LinkId, LinkState, PlatformEvent,
};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use anyhow::Context;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for one connection cycle's behavior.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Hardware address of the target peripheral.
    pub target_address: String,
    /// Service UUID to resolve after connecting.
    pub service_uuid: Uuid,
    /// Writable characteristic UUID within the service.
    pub characteristic_uuid: Uuid,
    /// How long a scan runs before stopping automatically.
    pub scan_timeout: Duration,
    /// Tear the link down after a failed service discovery so the next
    /// switch_connection starts a clean cycle.
    pub rediscover_on_failure: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_address: "DC:61:83:59:D3:11".to_string(),
            service_uuid: protocol::UART_SERVICE_UUID,
            characteristic_uuid: protocol::UART_TX_CHAR_UUID,
            scan_timeout: Duration::from_millis(5000),
            rediscover_on_failure: false,
        }
    }
}

impl LinkConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            target_address: settings.target_address.clone(),
            service_uuid: Uuid::parse_str(&settings.service_uuid)
                .context("invalid service UUID in settings")?,
            characteristic_uuid: Uuid::parse_str(&settings.characteristic_uuid)
                .context("invalid characteristic UUID in settings")?,
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            rediscover_on_failure: settings.rediscover_on_failure,
        })
    }
}

/// The characteristic resolved by service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Handle to an established GATT link plus, once discovery succeeds, the
/// resolved writable characteristic.
#[derive(Debug, Clone, Copy)]
pub struct ActiveLink {
    pub link: LinkId,
    pub characteristic: Option<ResolvedCharacteristic>,
}

#[derive(Default)]
struct LinkCell {
    state: ConnectionState,
    link: Option<ActiveLink>,
}

/// Connection state and active link, shared between the driver (writer) and
/// the transmitter (snapshot reader).
#[derive(Default)]
pub struct SharedLinkState {
    cell: Mutex<LinkCell>,
}

impl SharedLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.cell.lock().expect("link state mutex poisoned").state
    }

    fn set_state(&self, next: ConnectionState) {
        let mut cell = self.cell.lock().expect("link state mutex poisoned");
        if cell.state != next {
            info!(from = ?cell.state, to = ?next, "Connection state changed");
            cell.state = next;
        }
    }

    fn begin_link(&self, link: LinkId) {
        let mut cell = self.cell.lock().expect("link state mutex poisoned");
        cell.link = Some(ActiveLink {
            link,
            characteristic: None,
        });
    }

    fn resolve_characteristic(&self, characteristic: ResolvedCharacteristic) {
        let mut cell = self.cell.lock().expect("link state mutex poisoned");
        if let Some(active) = cell.link.as_mut() {
            active.characteristic = Some(characteristic);
        }
    }

    fn clear_link(&self) {
        let mut cell = self.cell.lock().expect("link state mutex poisoned");
        cell.link = None;
    }

    pub fn active_link(&self) -> Option<LinkId> {
        self.cell
            .lock()
            .expect("link state mutex poisoned")
            .link
            .map(|l| l.link)
    }

    /// Snapshot for the transmitter: `Some` exactly when the state is Ready
    /// and the characteristic has been resolved.
    pub fn write_target(&self) -> Option<(LinkId, ResolvedCharacteristic)> {
        let cell = self.cell.lock().expect("link state mutex poisoned");
        if cell.state != ConnectionState::Ready {
            return None;
        }
        cell.link
            .and_then(|active| active.characteristic.map(|ch| (active.link, ch)))
    }

    pub fn status(&self) -> LinkStatus {
        let cell = self.cell.lock().expect("link state mutex poisoned");
        LinkStatus {
            state: cell.state,
            characteristic_resolved: cell
                .link
                .map(|l| l.characteristic.is_some())
                .unwrap_or(false),
        }
    }
}

/// Commands from the facade (and the scan-timeout task) to the driver.
#[derive(Debug)]
pub enum Command {
    SwitchConnection,
    ScanTimeout { generation: u64 },
    Shutdown,
}

/// Event loop driving the connection state machine.
///
/// Platform callbacks and facade commands are serialized through one
/// `select!` loop, so transitions never interleave.
pub struct ConnectionDriver {
    platform: Arc<dyn BlePlatform>,
    shared: Arc<SharedLinkState>,
    scanner: BleScanner,
    config: LinkConfig,
    events: mpsc::UnboundedReceiver<PlatformEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionDriver {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        shared: Arc<SharedLinkState>,
        config: LinkConfig,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
        command_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let scanner = BleScanner::new(Arc::clone(&platform), command_tx, config.scan_timeout);
        Self {
            platform,
            shared,
            scanner,
            config,
            events,
            commands,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.handle_event(event).await,
                Some(command) = self.commands.recv() => {
                    if matches!(command, Command::Shutdown) {
                        break;
                    }
                    self.handle_command(command).await;
                }
                else => break,
            }
        }
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.scanner.stop().await;
        if let Some(link) = self.shared.active_link() {
            if let Err(e) = self.platform.disconnect(link).await {
                warn!(error = %e, "Teardown disconnect failed");
            }
        }
        self.shared.clear_link();
        self.shared.set_state(ConnectionState::Disconnected);
        debug!("Connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SwitchConnection => self.switch_connection().await,
            Command::ScanTimeout { generation } => self.scan_timed_out(generation).await,
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Linked: request teardown (the transition happens on the callback).
    /// Scanning: no-op. Disconnected: start a scan.
    async fn switch_connection(&mut self) {
        let state = self.shared.state();

        if state.is_linked() {
            if let Some(link) = self.shared.active_link() {
                info!(%link, "Disconnect requested");
                if let Err(e) = self.platform.disconnect(link).await {
                    warn!(error = %e, "Disconnect request failed");
                }
            }
            return;
        }

        if state == ConnectionState::Scanning {
            debug!("Scan already in progress");
            return;
        }

        match self.scanner.start().await {
            Ok(()) => self.shared.set_state(ConnectionState::Scanning),
            Err(e) => warn!(error = %e, "Failed to start scanning"),
        }
    }

    async fn scan_timed_out(&mut self, generation: u64) {
        if !self.scanner.is_current(generation) {
            return;
        }
        info!("Scan timed out with no advertisement from target");
        self.scanner.stop().await;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdvertisementSeen {
                address,
                local_name,
                rssi,
            } => self.handle_advertisement(address, local_name, rssi).await,
            PlatformEvent::LinkStateChanged { link, state } => {
                self.handle_link_state(link, state).await
            }
            PlatformEvent::ServicesDiscovered {
                link,
                status,
                services,
            } => self.handle_services_discovered(link, status, services).await,
        }
    }

    /// First match wins: the state leaves Scanning before the connect
    /// request, so a repeated advertisement cannot initiate twice.
    async fn handle_advertisement(
        &mut self,
        address: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) {
        if self.shared.state() != ConnectionState::Scanning {
            return;
        }
        if !address.eq_ignore_ascii_case(&self.config.target_address) {
            return;
        }

        info!(
            address = %address,
            name = local_name.as_deref().unwrap_or("Unknown"),
            rssi = ?rssi,
            "Target peripheral found"
        );
        self.scanner.stop().await;
        self.shared.set_state(ConnectionState::Connecting);

        match self.platform.connect(&address).await {
            Ok(link) => {
                self.shared.begin_link(link);
                debug!(%link, "Connect request issued");
            }
            Err(e) => {
                warn!(error = %e, "Connect request failed");
                self.shared.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn handle_link_state(&mut self, link: LinkId, state: LinkState) {
        if self.shared.active_link() != Some(link) {
            debug!(%link, ?state, "Ignoring event for stale link");
            return;
        }

        match state {
            LinkState::Connected => {
                if self.shared.state() != ConnectionState::Connecting {
                    return;
                }
                info!(%link, "Connected to GATT server");
                self.shared.set_state(ConnectionState::ServicesDiscovering);
                if let Err(e) = self.platform.discover_services(link).await {
                    warn!(error = %e, "Service discovery request failed");
                    self.discovery_failed(link).await;
                }
            }
            LinkState::Disconnected => {
                info!(%link, "Disconnected from GATT server");
                self.shared.clear_link();
                self.shared.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn handle_services_discovered(
        &mut self,
        link: LinkId,
        status: DiscoveryStatus,
        services: Vec<GattService>,
    ) {
        if self.shared.state() != ConnectionState::ServicesDiscovering
            || self.shared.active_link() != Some(link)
        {
            debug!(%link, "Ignoring stale service-discovery result");
            return;
        }

        if status != DiscoveryStatus::Success {
            warn!(%link, "Service discovery reported failure");
            self.discovery_failed(link).await;
            return;
        }

        let service = match services
            .iter()
            .find(|s| s.uuid == self.config.service_uuid)
        {
            Some(service) => service,
            None => {
                warn!(service = %self.config.service_uuid, "UART service not found");
                self.discovery_failed(link).await;
                return;
            }
        };

        let characteristic = match service
            .characteristics
            .iter()
            .find(|c| c.uuid == self.config.characteristic_uuid)
        {
            Some(ch) => ch,
            None => {
                warn!(
                    characteristic = %self.config.characteristic_uuid,
                    "TX characteristic not found"
                );
                self.discovery_failed(link).await;
                return;
            }
        };

        // Notifications may be refused by some stacks; the link can still
        // carry fire-and-forget writes, so continue either way.
        if let Err(e) = self
            .platform
            .subscribe(link, service.uuid, characteristic.uuid)
            .await
        {
            warn!(error = %e, "Could not enable notifications");
        }

        self.shared.resolve_characteristic(ResolvedCharacteristic {
            service: service.uuid,
            uuid: characteristic.uuid,
        });
        self.shared.set_state(ConnectionState::Ready);
        info!(%link, "Service and characteristic resolved, link ready");
    }

    /// Failed discovery never advances to Ready. The retry policy is
    /// explicit: either the operator re-triggers via switch_connection, or
    /// (`rediscover_on_failure`) the link is torn down right away.
    async fn discovery_failed(&mut self, link: LinkId) {
        if self.config.rediscover_on_failure {
            info!(%link, "Requesting disconnect after failed discovery");
            if let Err(e) = self.platform.disconnect(link).await {
                warn!(error = %e, "Disconnect request failed");
            }
        } else {
            warn!(%link, "Link will stay unusable until switch_connection is called");
        }
    }
}
