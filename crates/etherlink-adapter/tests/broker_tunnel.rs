mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{frame, init_tracing, wait_until, CountingLine, RecordingGuest, LAYOUT};
use etherlink_adapter::{EtherAdapter, EtherStatus, HandlerRef};
use etherlink_backend::{BrokerTunnel, EtherConfig, TracingWarnings};
use etherlink_broker::MemoryBroker;

#[test]
fn only_foreign_broker_traffic_is_dispatched() {
    init_tracing();
    let broker = MemoryBroker::new();
    let tunnel = Arc::new(BrokerTunnel::with_link(
        broker.connect(),
        "adapter-a".into(),
        Arc::new(TracingWarnings),
    ));
    let line = Arc::new(CountingLine::default());
    let mut adapter = EtherAdapter::new(
        EtherConfig::default(),
        LAYOUT,
        line.clone(),
        Arc::new(TracingWarnings),
    );
    assert!(adapter.init_with_backend(tunnel.clone()));
    adapter.attach_protocol(0x809b, HandlerRef(5));

    // Our own transmission comes back from the fanout exchange and must be dropped.
    assert_eq!(
        adapter.transmit(&frame(0x809b, b"self")),
        EtherStatus::NoErr
    );
    broker.publish("adapter-a", &frame(0x809b, b"forged self"));
    broker.publish("adapter-b", &frame(0x809b, b"foreign"));

    assert!(wait_until(|| line.count() == 1));
    let mut guest = RecordingGuest::default();
    assert_eq!(adapter.handle_interrupt(&mut guest), 1);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(line.count(), 1);
    assert_eq!(guest.payloads, vec![b"foreign".to_vec()]);
    assert_eq!(tunnel.echoes_suppressed(), 2);

    adapter.shutdown();
}
