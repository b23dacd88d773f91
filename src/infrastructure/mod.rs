//! Infrastructure: platform-facing plumbing (BLE, logging).

pub mod bluetooth;
pub mod logging;
