//! End-to-end controller tests against a scripted platform mock.
//!
//! The mock records every call the controller makes; the tests inject the
//! three platform callbacks by hand and assert on the recorded calls and
//! the observable link state. Tests run on the current-thread runtime, so
//! nothing interleaves between two statements that do not await.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uartlink::infrastructure::bluetooth::platform::{
    BlePlatform, DiscoveryStatus, GattCharacteristic, GattService, LinkId, LinkState,
    PlatformError, PlatformEvent, WriteMode,
};
use uartlink::infrastructure::bluetooth::protocol;
use uartlink::{ConnectionState, LinkConfig, LinkController};

const TARGET: &str = "DC:61:83:59:D3:11";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartDiscovery,
    StopDiscovery,
    Connect(String),
    Disconnect(LinkId),
    DiscoverServices(LinkId),
    Subscribe {
        link: LinkId,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
    },
    Write {
        link: LinkId,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
        payload: Vec<u8>,
        mode: WriteMode,
    },
}

struct MockPlatform {
    calls: Mutex<Vec<Call>>,
    next_link: AtomicU64,
}

impl MockPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_link: AtomicU64::new(1),
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Write { .. }))
            .collect()
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn start_discovery(&self) -> Result<(), PlatformError> {
        self.record(Call::StartDiscovery);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), PlatformError> {
        self.record(Call::StopDiscovery);
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<LinkId, PlatformError> {
        self.record(Call::Connect(address.to_string()));
        Ok(LinkId(self.next_link.fetch_add(1, Ordering::SeqCst)))
    }

    async fn disconnect(&self, link: LinkId) -> Result<(), PlatformError> {
        self.record(Call::Disconnect(link));
        Ok(())
    }

    async fn discover_services(&self, link: LinkId) -> Result<(), PlatformError> {
        self.record(Call::DiscoverServices(link));
        Ok(())
    }

    async fn write_characteristic(
        &self,
        link: LinkId,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        self.record(Call::Write {
            link,
            service,
            characteristic,
            payload: payload.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        link: LinkId,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
    ) -> Result<(), PlatformError> {
        self.record(Call::Subscribe {
            link,
            service,
            characteristic,
        });
        Ok(())
    }
}

struct Harness {
    controller: LinkController,
    platform: Arc<MockPlatform>,
    events: mpsc::UnboundedSender<PlatformEvent>,
}

fn setup_with(config: LinkConfig) -> Harness {
    let platform = MockPlatform::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let controller = LinkController::start(platform.clone(), event_rx, config);
    Harness {
        controller,
        platform,
        events: event_tx,
    }
}

fn setup() -> Harness {
    setup_with(LinkConfig::default())
}

impl Harness {
    async fn settle(&self) {
        // Let the driver and transmitter tasks drain their queues.
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn advertise(&self, address: &str) {
        self.events
            .send(PlatformEvent::AdvertisementSeen {
                address: address.to_string(),
                local_name: Some("uart-peripheral".to_string()),
                rssi: Some(-52),
            })
            .unwrap();
    }

    fn link_state(&self, link: LinkId, state: LinkState) {
        self.events
            .send(PlatformEvent::LinkStateChanged { link, state })
            .unwrap();
    }

    fn services_discovered(&self, link: LinkId, status: DiscoveryStatus, services: Vec<GattService>) {
        self.events
            .send(PlatformEvent::ServicesDiscovered {
                link,
                status,
                services,
            })
            .unwrap();
    }

    fn target_services(&self) -> Vec<GattService> {
        vec![GattService {
            uuid: protocol::UART_SERVICE_UUID,
            characteristics: vec![
                GattCharacteristic {
                    uuid: protocol::UART_TX_CHAR_UUID,
                },
                // An unrelated characteristic the controller must skip.
                GattCharacteristic {
                    uuid: uuid::Uuid::from_u128(0x1234),
                },
            ],
        }]
    }

    /// Drive the full cycle to Ready and return the link handle.
    async fn bring_up(&self) -> LinkId {
        self.controller.switch_connection();
        self.settle().await;
        self.advertise(TARGET);
        self.settle().await;
        let link = LinkId(1);
        self.link_state(link, LinkState::Connected);
        self.settle().await;
        self.services_discovered(link, DiscoveryStatus::Success, self.target_services());
        self.settle().await;
        assert_eq!(self.controller.status().state, ConnectionState::Ready);
        link
    }
}

#[tokio::test]
async fn end_to_end_connect_and_send() {
    let h = setup();

    // switch_connection while disconnected starts exactly one scan
    h.controller.switch_connection();
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::StartDiscovery), 1);
    assert_eq!(h.controller.status().state, ConnectionState::Scanning);

    // advertisement match stops the scan and issues one connect
    h.advertise(TARGET);
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::StopDiscovery), 1);
    assert_eq!(
        h.platform.count(|c| matches!(c, Call::Connect(_))),
        1,
        "exactly one connect request"
    );
    assert_eq!(h.controller.status().state, ConnectionState::Connecting);

    // link up triggers service discovery
    h.link_state(LinkId(1), LinkState::Connected);
    h.settle().await;
    assert_eq!(
        h.platform.count(|c| *c == Call::DiscoverServices(LinkId(1))),
        1
    );
    assert_eq!(
        h.controller.status().state,
        ConnectionState::ServicesDiscovering
    );

    // successful discovery resolves the pair, subscribes, and goes Ready
    h.services_discovered(LinkId(1), DiscoveryStatus::Success, h.target_services());
    h.settle().await;
    let status = h.controller.status();
    assert_eq!(status.state, ConnectionState::Ready);
    assert!(status.characteristic_resolved);
    assert_eq!(
        h.platform.count(|c| matches!(
            c,
            Call::Subscribe {
                service,
                characteristic,
                ..
            } if *service == protocol::UART_SERVICE_UUID
                && *characteristic == protocol::UART_TX_CHAR_UUID
        )),
        1
    );

    // a message goes out as UTF-8 "hello;" with a no-response write
    h.controller.send_message("hello");
    h.settle().await;
    let writes = h.platform.writes();
    assert_eq!(writes.len(), 1);
    match &writes[0] {
        Call::Write {
            link,
            service,
            characteristic,
            payload,
            mode,
        } => {
            assert_eq!(*link, LinkId(1));
            assert_eq!(*service, protocol::UART_SERVICE_UUID);
            assert_eq!(*characteristic, protocol::UART_TX_CHAR_UUID);
            assert_eq!(payload, b"hello;");
            assert_eq!(*mode, WriteMode::WithoutResponse);
        }
        other => panic!("unexpected call: {other:?}"),
    }
}

#[tokio::test]
async fn switch_connection_is_idempotent_while_scanning() {
    let h = setup();
    h.controller.switch_connection();
    h.controller.switch_connection();
    h.settle().await;
    h.controller.switch_connection();
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::StartDiscovery), 1);
}

#[tokio::test]
async fn foreign_advertisements_are_ignored() {
    let h = setup();
    h.controller.switch_connection();
    h.settle().await;
    h.advertise("11:22:33:44:55:66");
    h.settle().await;
    assert_eq!(h.platform.count(|c| matches!(c, Call::Connect(_))), 0);
    assert_eq!(h.controller.status().state, ConnectionState::Scanning);
}

#[tokio::test]
async fn repeated_match_does_not_reconnect() {
    let h = setup();
    h.controller.switch_connection();
    h.settle().await;
    h.advertise(TARGET);
    h.advertise(TARGET);
    h.settle().await;
    h.advertise(TARGET);
    h.settle().await;
    assert_eq!(h.platform.count(|c| matches!(c, Call::Connect(_))), 1);
}

#[tokio::test]
async fn scan_timeout_returns_to_disconnected() {
    let h = setup_with(LinkConfig {
        scan_timeout: Duration::from_millis(20),
        ..LinkConfig::default()
    });
    h.controller.switch_connection();
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Scanning);

    tokio::time::sleep(Duration::from_millis(60)).await;
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Disconnected);
    assert_eq!(h.platform.count(|c| *c == Call::StopDiscovery), 1);

    // the controller can retry after a timeout
    h.controller.switch_connection();
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::StartDiscovery), 2);
}

#[tokio::test]
async fn last_write_wins_before_inspection() {
    let h = setup();
    h.bring_up().await;

    // No await between the three sends: the transmitter cannot observe the
    // intermediate values on a current-thread runtime.
    h.controller.send_message("m1");
    h.controller.send_message("m2");
    h.controller.send_message("m3");
    h.settle().await;

    let writes = h.platform.writes();
    assert_eq!(writes.len(), 1, "only the freshest message is transmitted");
    assert!(
        matches!(&writes[0], Call::Write { payload, .. } if payload == b"m3;"),
        "m3 wins: {writes:?}"
    );
}

#[tokio::test]
async fn message_without_ready_link_is_dropped() {
    let h = setup();
    h.controller.switch_connection();
    h.settle().await;

    h.controller.send_message("too early");
    h.settle().await;
    assert!(h.platform.writes().is_empty());

    // the dropped message does not resurface once the link is ready
    h.advertise(TARGET);
    h.settle().await;
    h.link_state(LinkId(1), LinkState::Connected);
    h.settle().await;
    h.services_discovered(LinkId(1), DiscoveryStatus::Success, h.target_services());
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Ready);
    h.settle().await;
    assert!(h.platform.writes().is_empty());
}

#[tokio::test]
async fn paused_messages_are_cleared_not_written() {
    let h = setup();
    h.bring_up().await;

    h.controller.pause();
    h.controller.send_message("x");
    h.settle().await;
    assert!(h.platform.writes().is_empty());

    // resuming afterwards does not replay the dropped message
    h.controller.resume();
    h.settle().await;
    assert!(h.platform.writes().is_empty());

    // but a fresh message flows again
    h.controller.send_message("y");
    h.settle().await;
    assert_eq!(h.platform.writes().len(), 1);
}

#[tokio::test]
async fn disconnect_event_clears_the_link() {
    let h = setup();
    let link = h.bring_up().await;

    h.link_state(link, LinkState::Disconnected);
    h.settle().await;
    let status = h.controller.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.characteristic_resolved);

    // writes are refused once the link is gone
    h.controller.send_message("after");
    h.settle().await;
    assert!(h.platform.writes().is_empty());
}

#[tokio::test]
async fn switch_connection_while_ready_requests_disconnect() {
    let h = setup();
    let link = h.bring_up().await;

    h.controller.switch_connection();
    h.settle().await;
    // request only; the state still flips on the callback
    assert_eq!(h.platform.count(|c| *c == Call::Disconnect(link)), 1);
    assert_eq!(h.controller.status().state, ConnectionState::Ready);

    h.link_state(link, LinkState::Disconnected);
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn discovery_failure_stalls_until_operator_acts() {
    let h = setup();
    h.controller.switch_connection();
    h.settle().await;
    h.advertise(TARGET);
    h.settle().await;
    h.link_state(LinkId(1), LinkState::Connected);
    h.settle().await;

    h.services_discovered(LinkId(1), DiscoveryStatus::Failed, Vec::new());
    h.settle().await;
    // no Ready, no automatic retry with the default policy
    assert_eq!(
        h.controller.status().state,
        ConnectionState::ServicesDiscovering
    );
    assert_eq!(h.platform.count(|c| matches!(c, Call::Disconnect(_))), 0);

    // the operator can still recover through switch_connection
    h.controller.switch_connection();
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::Disconnect(LinkId(1))), 1);
}

#[tokio::test]
async fn discovery_failure_can_tear_down_when_configured() {
    let h = setup_with(LinkConfig {
        rediscover_on_failure: true,
        ..LinkConfig::default()
    });
    h.controller.switch_connection();
    h.settle().await;
    h.advertise(TARGET);
    h.settle().await;
    h.link_state(LinkId(1), LinkState::Connected);
    h.settle().await;

    h.services_discovered(LinkId(1), DiscoveryStatus::Failed, Vec::new());
    h.settle().await;
    assert_eq!(h.platform.count(|c| *c == Call::Disconnect(LinkId(1))), 1);
}

#[tokio::test]
async fn missing_characteristic_never_reaches_ready() {
    let h = setup();
    h.controller.switch_connection();
    h.settle().await;
    h.advertise(TARGET);
    h.settle().await;
    h.link_state(LinkId(1), LinkState::Connected);
    h.settle().await;

    // right service, wrong characteristic
    let services = vec![GattService {
        uuid: protocol::UART_SERVICE_UUID,
        characteristics: vec![GattCharacteristic {
            uuid: uuid::Uuid::from_u128(0xdead),
        }],
    }];
    h.services_discovered(LinkId(1), DiscoveryStatus::Success, services);
    h.settle().await;

    let status = h.controller.status();
    assert_ne!(status.state, ConnectionState::Ready);
    assert!(!status.characteristic_resolved);
}

#[tokio::test]
async fn stale_link_events_are_ignored() {
    let h = setup();
    let link = h.bring_up().await;

    // an event for a handle that was never issued must not touch the state
    h.link_state(LinkId(99), LinkState::Disconnected);
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Ready);

    h.link_state(link, LinkState::Disconnected);
    h.settle().await;
    assert_eq!(h.controller.status().state, ConnectionState::Disconnected);
}
