//! Platform BLE Seam
//!
//! The platform BLE stack is an external collaborator: this module defines
//! the [`BlePlatform`] trait the controller drives and the [`PlatformEvent`]
//! callbacks it consumes. Events are delivered over an unbounded channel so
//! a platform implementation registers one named handler at construction
//! instead of nesting closures into control flow.
//!
//! The shipped implementation is [`super::adapter::BtleplugPlatform`]; tests
//! substitute a scripted mock.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque handle to an established (or establishing) GATT link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Link-level connection state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Write mode for a characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Acknowledged write.
    WithResponse,
    /// Fire-and-forget; submission success does not confirm delivery.
    WithoutResponse,
}

/// Outcome of a service-discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Success,
    Failed,
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
}

/// A GATT service and its characteristics as reported by discovery.
#[derive(Debug, Clone)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Asynchronous callbacks delivered by the platform BLE stack.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// An advertisement was observed while discovery is active.
    AdvertisementSeen {
        address: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    },
    /// The link-layer state of a connection changed.
    LinkStateChanged { link: LinkId, state: LinkState },
    /// A service-discovery request completed.
    ServicesDiscovered {
        link: LinkId,
        status: DiscoveryStatus,
        services: Vec<GattService>,
    },
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no BLE adapter available")]
    AdapterUnavailable,

    #[error("failed to start or stop discovery: {0}")]
    DiscoveryFailed(String),

    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("failed to disconnect: {0}")]
    DisconnectFailed(String),

    #[error("unknown link handle: {0}")]
    LinkNotFound(LinkId),

    #[error("characteristic {characteristic} not found on link")]
    CharacteristicNotFound { characteristic: Uuid },

    #[error("failed to subscribe to notifications: {0}")]
    SubscribeFailed(String),

    #[error("failed to write characteristic: {0}")]
    WriteFailed(String),
}

/// The platform BLE API the controller drives.
///
/// Requests return quickly; completion of connect and service discovery is
/// reported through [`PlatformEvent`]s on the channel the implementation was
/// constructed with.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    async fn start_discovery(&self) -> Result<(), PlatformError>;

    async fn stop_discovery(&self) -> Result<(), PlatformError>;

    /// Initiate a connection to the peripheral with the given address.
    /// Returns the link handle; the `Connected` transition arrives as a
    /// [`PlatformEvent::LinkStateChanged`] callback.
    async fn connect(&self, address: &str) -> Result<LinkId, PlatformError>;

    /// Request link teardown; the `Disconnected` transition arrives as a
    /// callback.
    async fn disconnect(&self, link: LinkId) -> Result<(), PlatformError>;

    /// Request service discovery; results arrive as a
    /// [`PlatformEvent::ServicesDiscovered`] callback.
    async fn discover_services(&self, link: LinkId) -> Result<(), PlatformError>;

    /// Submit a characteristic write. `Ok` confirms submission only; with
    /// [`WriteMode::WithoutResponse`] there is no delivery confirmation.
    async fn write_characteristic(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError>;

    /// Enable notification delivery on a characteristic.
    async fn subscribe(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError>;
}
