mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{frame, init_tracing, wait_until, CountingLine, RecordingGuest, RecordingWarnings, LAYOUT};
use etherlink_adapter::{
    EtherAdapter, EtherStatus, GuestServices, HandlerRef, HandlerRegisters, InterruptLine,
    PipelineState, FALLBACK_MAC,
};
use etherlink_backend::{BackendKind, EtherConfig, LoopbackBackend, TracingWarnings};
use etherlink_frame::{LinkPadding, MacAddr};

fn adapter_with(
    config: EtherConfig,
    line: Arc<dyn InterruptLine>,
    warnings: Arc<RecordingWarnings>,
) -> EtherAdapter {
    EtherAdapter::new(config, LAYOUT, line, warnings)
}

fn loopback_adapter(backend: Arc<LoopbackBackend>) -> (EtherAdapter, Arc<CountingLine>) {
    init_tracing();
    let line = Arc::new(CountingLine::default());
    let mut adapter = EtherAdapter::new(
        EtherConfig::default(),
        LAYOUT,
        line.clone(),
        Arc::new(TracingWarnings),
    );
    assert!(adapter.init_with_backend(backend));
    (adapter, line)
}

#[test]
fn unconfigured_adapter_stays_closed_without_warnings() {
    let warnings = Arc::new(RecordingWarnings::default());
    let mut adapter = adapter_with(
        EtherConfig::default(),
        Arc::new(CountingLine::default()),
        warnings.clone(),
    );
    assert!(!adapter.init());
    assert!(!adapter.is_open());
    assert!(warnings.messages().is_empty());
    assert_eq!(adapter.hardware_address(), FALLBACK_MAC);
    assert_eq!(adapter.transmit(&frame(0x0800, &[0; 46])), EtherStatus::ExcessCollisions);
}

#[test]
fn failed_open_reports_one_warning() {
    let warnings = Arc::new(RecordingWarnings::default());
    let mut adapter = adapter_with(
        EtherConfig::with_device("slirp"),
        Arc::new(CountingLine::default()),
        warnings.clone(),
    );
    assert!(!adapter.init());
    assert!(!adapter.is_open());
    assert_eq!(warnings.messages().len(), 1);
    assert_eq!(adapter.pipeline_state(), PipelineState::Stopped);
}

#[test]
fn protocol_registration_status_codes() {
    let mut adapter = adapter_with(
        EtherConfig::default(),
        Arc::new(CountingLine::default()),
        Arc::default(),
    );
    assert_eq!(adapter.attach_protocol(0x809b, HandlerRef(1)), EtherStatus::NoErr);
    assert_eq!(adapter.attach_protocol(0x809b, HandlerRef(2)), EtherStatus::LapProtErr);
    assert_eq!(adapter.detach_protocol(0x80f3), EtherStatus::LapProtErr);
    assert_eq!(adapter.protocols().handler_for(0x809b), Some(HandlerRef(1)));

    adapter.reset();
    assert!(adapter.protocols().is_empty());
    assert_eq!(adapter.detach_protocol(0x809b), EtherStatus::LapProtErr);
}

#[test]
fn oversized_transmit_is_a_length_error() {
    let (adapter, _line) = loopback_adapter(Arc::new(LoopbackBackend::default()));
    assert_eq!(adapter.transmit(&vec![0u8; 1515]), EtherStatus::LenErr);
    assert_eq!(adapter.transmit(&vec![0u8; 1514]), EtherStatus::NoErr);
}

#[test]
fn transmitted_frame_loops_back_to_the_handler() {
    let backend = Arc::new(LoopbackBackend::new(LinkPadding::LeadingPad2));
    let (mut adapter, line) = loopback_adapter(backend.clone());
    assert_eq!(adapter.pipeline_state(), PipelineState::Running);
    assert_eq!(adapter.attach_protocol(0x809b, HandlerRef(0xabc)), EtherStatus::NoErr);

    let payload: Vec<u8> = (0..100u8).collect();
    let sent = frame(0x809b, &payload);
    let mut guest = RecordingGuest::default();
    assert_eq!(adapter.transmit_from_guest(&mut guest, 0x100, 0), EtherStatus::NoErr);
    assert!(wait_until(|| adapter.stats().rx_runts == 1));
    assert_eq!(line.count(), 0);

    guest.memory[0x100..0x100 + sent.len()].copy_from_slice(&sent);
    assert_eq!(
        adapter.transmit_from_guest(&mut guest, 0x100, sent.len()),
        EtherStatus::NoErr
    );
    assert!(wait_until(|| line.count() == 1));
    assert_eq!(adapter.handle_interrupt(&mut guest), 1);

    assert_eq!(guest.calls.len(), 1);
    let (handler, registers) = guest.calls[0];
    assert_eq!(handler, HandlerRef(0xabc));
    assert_eq!(registers.packet_type, 0x809b);
    assert_eq!(registers.remaining_len, 100);
    assert_eq!(guest.payloads[0], payload);
    let rha = LAYOUT.read_header_area as usize;
    assert_eq!(&guest.memory[rha..rha + 14], &sent[..14]);
    assert_eq!(guest.interrupt_depth, 0);

    let stats = adapter.stats();
    assert_eq!(stats.tx_frames, 2);
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_dispatched, 1);
    assert_eq!(stats.rx_runts, 1);
}

#[test]
fn runts_from_the_backend_never_reach_the_guest() {
    let backend = Arc::new(LoopbackBackend::default());
    let (mut adapter, line) = loopback_adapter(backend.clone());
    adapter.attach_protocol(0, HandlerRef(1));

    backend.inject(&[0u8; 13]);
    backend.inject(&frame(60, &[0; 60]));
    assert!(wait_until(|| line.count() == 1));

    let mut guest = RecordingGuest::default();
    adapter.handle_interrupt(&mut guest);
    assert_eq!(guest.calls.len(), 1);
    assert_eq!(guest.calls[0].1.remaining_len, 60);
    assert_eq!(adapter.stats().rx_runts, 1);
}

#[test]
fn at_most_one_frame_is_outstanding() {
    let backend = Arc::new(LoopbackBackend::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let line = {
        let events = events.clone();
        Arc::new(move || events.lock().unwrap().push("raise"))
    };
    let mut adapter = EtherAdapter::new(
        EtherConfig::default(),
        LAYOUT,
        line,
        Arc::new(TracingWarnings),
    );
    assert!(adapter.init_with_backend(backend.clone()));
    adapter.attach_protocol(0x0800, HandlerRef(9));

    for i in 0..5u8 {
        backend.inject(&frame(0x0800, &[i; 46]));
    }

    let mut guest = RecordingGuest::default();
    for delivered in 1..=5 {
        assert!(wait_until(|| events.lock().unwrap().len() == 2 * delivered - 1));
        // Give the pipeline a chance to misbehave.
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(events.lock().unwrap().len(), 2 * delivered - 1);
        // Logged first: the next raise can only follow the real acknowledgment.
        events.lock().unwrap().push("ack");
        assert_eq!(adapter.handle_interrupt(&mut guest), 1);
    }

    let events = events.lock().unwrap();
    assert!(events
        .chunks(2)
        .all(|pair| pair == ["raise", "ack"]));
    let order: Vec<u8> = guest.payloads.iter().map(|payload| payload[0]).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

/// Guest that lets the backend deliver a frame right after interrupt processing ends, before
/// the adapter acknowledges.
struct LateArrivalGuest {
    inner: RecordingGuest,
    backend: Arc<LoopbackBackend>,
    line: Arc<CountingLine>,
    armed: bool,
}

impl GuestServices for LateArrivalGuest {
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) {
        self.inner.read_memory(addr, buf);
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) {
        self.inner.write_memory(addr, bytes);
    }

    fn invoke_handler(&mut self, handler: HandlerRef, registers: &mut HandlerRegisters) {
        self.inner.invoke_handler(handler, registers);
    }

    fn enter_interrupt(&mut self) {
        self.inner.enter_interrupt();
    }

    fn leave_interrupt(&mut self) {
        self.inner.leave_interrupt();
        if std::mem::take(&mut self.armed) {
            let raised = self.line.count();
            self.backend.inject(&frame(0x0800, &[7; 46]));
            assert!(wait_until(|| self.line.count() > raised));
        }
    }
}

#[test]
fn empty_interrupt_does_not_drop_a_frame_parked_before_the_ack() {
    let backend = Arc::new(LoopbackBackend::default());
    let (mut adapter, line) = loopback_adapter(backend.clone());
    adapter.attach_protocol(0x0800, HandlerRef(3));

    let mut guest = LateArrivalGuest {
        inner: RecordingGuest::default(),
        backend,
        line: line.clone(),
        armed: true,
    };
    assert_eq!(adapter.handle_interrupt(&mut guest), 0);
    assert_eq!(line.count(), 1);
    assert!(guest.inner.calls.is_empty());

    assert_eq!(adapter.handle_interrupt(&mut guest), 1);
    assert_eq!(guest.inner.calls.len(), 1);
    assert_eq!(guest.inner.payloads[0], vec![7; 46]);
    let stats = adapter.stats();
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_dispatched, 1);
}

#[test]
fn full_transmit_queue_counts_as_collision() {
    let backend = Arc::new(LoopbackBackend::default().with_capacity(1));
    let (adapter, _line) = loopback_adapter(backend);
    let statuses: Vec<EtherStatus> = (0..3)
        .map(|_| adapter.transmit(&frame(0x0800, &[0; 46])))
        .collect();
    assert!(statuses.contains(&EtherStatus::ExcessCollisions));
    assert!(adapter.stats().tx_dropped_full >= 1);
}

#[test]
fn shutdown_with_unacknowledged_frame_is_prompt() {
    let backend = Arc::new(LoopbackBackend::default());
    let (mut adapter, line) = loopback_adapter(backend.clone());
    backend.inject(&frame(0x0800, &[0; 46]));
    backend.inject(&frame(0x0800, &[1; 46]));
    assert!(wait_until(|| line.count() == 1));

    let started = Instant::now();
    adapter.shutdown();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(backend.is_closed());
    assert!(!adapter.is_open());
    assert!(!adapter.acknowledge_interrupt());
    assert_eq!(adapter.hardware_address(), FALLBACK_MAC);
}

#[test]
fn broken_transport_stops_reception_only() {
    let backend = Arc::new(LoopbackBackend::default());
    let (mut adapter, line) = loopback_adapter(backend.clone());
    backend.break_link();
    std::thread::sleep(Duration::from_millis(50));

    assert!(adapter.is_open());
    assert_eq!(line.count(), 0);
    assert_eq!(adapter.transmit(&frame(0x0800, &[0; 46])), EtherStatus::NoErr);
    adapter.shutdown();
}

#[test]
fn multicast_requests_reach_the_backend() {
    let backend = Arc::new(LoopbackBackend::default());
    let (adapter, _line) = loopback_adapter(backend.clone());
    let group = MacAddr::new([0x09, 0x00, 0x07, 0xff, 0xff, 0xff]);
    assert_eq!(adapter.enable_multicast(group), EtherStatus::NoErr);
    assert_eq!(backend.multicast_addresses(), vec![group]);
    assert_eq!(adapter.disable_multicast(group), EtherStatus::NoErr);
    assert!(backend.multicast_addresses().is_empty());
}

#[test]
fn reinit_replaces_the_backend() {
    let first = Arc::new(LoopbackBackend::default());
    let second = Arc::new(LoopbackBackend::default());
    let (mut adapter, _line) = loopback_adapter(first.clone());
    assert_eq!(adapter.backend_kind(), Some(BackendKind::Loopback));
    assert!(adapter.init_with_backend(second.clone()));
    assert!(first.is_closed());
    assert!(!second.is_closed());
    drop(adapter);
    assert!(second.is_closed());
}
