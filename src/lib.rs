//! uartlink - single-peripheral BLE UART link controller.
//!
//! Discovers one predetermined peripheral by hardware address, establishes
//! a GATT connection, resolves a Nordic-UART-style service/characteristic
//! pair, and exposes a best-effort channel for `;`-terminated text messages.
//!
//! The host application constructs a [`LinkController`] against a
//! [`BlePlatform`] (the shipped btleplug backend, or a mock in tests) and
//! drives it through `switch_connection` / `send_message` / `pause` /
//! `resume`, observing progress via `status()` and the logs.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{ConnectionState, LinkStatus};
pub use domain::settings::{Settings, SettingsService};
pub use infrastructure::bluetooth::adapter::BtleplugPlatform;
pub use infrastructure::bluetooth::{
    BlePlatform, LinkConfig, LinkController, PlatformError, PlatformEvent,
};
