//! Bluetooth Module
//!
//! Best-effort BLE link to one predetermined UART peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     LinkController                       │
//! │   (Facade - switch_connection / send_message / pause)    │
//! └──────────┬──────────────────────────────┬───────────────┘
//!            │ commands                     │ deposit
//!            ▼                              ▼
//! ┌─────────────────────┐          ┌──────────────┐
//! │  ConnectionDriver   │          │    Outbox    │
//! │                     │          │ (single slot)│
//! │ - state machine     │          └──────┬───────┘
//! │ - BleScanner        │                 │ take
//! │ - ActiveLink        │                 ▼
//! └──────────┬──────────┘          ┌──────────────┐
//!            │ events              │ Transmitter  │
//!            ▼                     │ (worker task)│
//! ┌─────────────────────┐          └──────┬───────┘
//! │     BlePlatform     │◄────────────────┘ writes
//! │ (trait; btleplug or │
//! │  a test mock)       │
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UART service/characteristic UUIDs and message framing
//! - [`platform`] - the platform BLE seam: trait, events, errors
//! - [`adapter`] - btleplug-backed platform implementation
//! - [`scanner`] - discovery with automatic timeout stop
//! - [`connection`] - connection state machine and active-link ownership
//! - [`outbox`] - single-slot last-write-wins mailbox
//! - [`transmitter`] - fire-and-forget write worker
//! - [`service`] - the controller facade

pub mod adapter;
pub mod connection;
pub mod outbox;
pub mod platform;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transmitter;

// Re-export the public surface for convenience
pub use connection::LinkConfig;
pub use platform::{BlePlatform, PlatformError, PlatformEvent};
pub use service::LinkController;
