use serde::{Deserialize, Serialize};

/// Lifecycle of the link to the target peripheral.
///
/// Transitions are driven by platform callbacks and user action only;
/// `Disconnected` is both the initial state and the state reached after any
/// teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    ServicesDiscovering,
    Ready,
}

impl ConnectionState {
    /// True while a platform link handle exists for this state.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServicesDiscovering | Self::Ready
        )
    }
}

/// Snapshot of the link handed to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub characteristic_resolved: bool,
}
