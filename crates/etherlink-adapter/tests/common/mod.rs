#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use etherlink_adapter::{GuestLayout, GuestServices, HandlerRef, HandlerRegisters};
use etherlink_backend::{Severity, WarningSink};

pub const LAYOUT: GuestLayout = GuestLayout {
    packet_buffer: 0x0001_0000,
    read_header_area: 0x0002_0000,
    read_packet: 0x0003_0000,
};

/// Guest double with a flat memory and a log of handler calls.
pub struct RecordingGuest {
    pub memory: Vec<u8>,
    pub calls: Vec<(HandlerRef, HandlerRegisters)>,
    /// Payload bytes visible to each handler call, captured at call time.
    pub payloads: Vec<Vec<u8>>,
    pub interrupt_depth: i32,
}

impl Default for RecordingGuest {
    fn default() -> Self {
        Self {
            memory: vec![0; 0x0004_0000],
            calls: Vec::new(),
            payloads: Vec::new(),
            interrupt_depth: 0,
        }
    }
}

impl GuestServices for RecordingGuest {
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) {
        let start = addr as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) {
        let start = addr as usize;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn invoke_handler(&mut self, handler: HandlerRef, registers: &mut HandlerRegisters) {
        assert_eq!(self.interrupt_depth, 1, "handlers run in interrupt context");
        let start = registers.packet_ptr as usize;
        let payload = self.memory[start..start + registers.remaining_len as usize].to_vec();
        self.payloads.push(payload);
        self.calls.push((handler, *registers));
    }

    fn enter_interrupt(&mut self) {
        self.interrupt_depth += 1;
    }

    fn leave_interrupt(&mut self) {
        self.interrupt_depth -= 1;
    }
}

/// Interrupt line counting how often it was raised.
#[derive(Default)]
pub struct CountingLine(pub AtomicUsize);

impl CountingLine {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl etherlink_adapter::InterruptLine for CountingLine {
    fn raise(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingWarnings(pub Mutex<Vec<String>>);

impl RecordingWarnings {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl WarningSink for RecordingWarnings {
    fn report(&self, _severity: Severity, message: &str) {
        self.0.lock().unwrap().push(message.to_owned());
    }
}

pub fn frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(14 + payload.len());
    bytes.extend_from_slice(&[0xff; 6]);
    bytes.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x42]);
    bytes.extend_from_slice(&ether_type.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
