//! In-memory backend whose wire loops every sent frame back to its own receive side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use etherlink_frame::{Frame, LinkPadding, MacAddr};

use crate::error::{MulticastError, RecvError, SendError};
use crate::{BackendKind, EtherBackend};

pub const LOOPBACK_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

#[derive(Default)]
struct Wire {
    queued: VecDeque<Vec<u8>>,
    broken: bool,
}

/// Loopback transport for tests and for hosts without networking.
///
/// Frames are stored in their on-the-wire form so the configured [`LinkPadding`] is applied on
/// send and stripped on receive, like a real padded device.
pub struct LoopbackBackend {
    wire: Mutex<Wire>,
    ready: Condvar,
    padding: LinkPadding,
    capacity: Option<usize>,
    multicast: Mutex<Vec<MacAddr>>,
    sent: AtomicU64,
    closed: AtomicBool,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new(LinkPadding::None)
    }
}

impl LoopbackBackend {
    pub fn new(padding: LinkPadding) -> Self {
        Self {
            wire: Mutex::new(Wire::default()),
            ready: Condvar::new(),
            padding,
            capacity: None,
            multicast: Mutex::new(Vec::new()),
            sent: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Limit the number of frames in flight; further sends report congestion.
    pub fn with_capacity(mut self, frames: usize) -> Self {
        self.capacity = Some(frames);
        self
    }

    fn lock_wire(&self) -> MutexGuard<'_, Wire> {
        self.wire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue raw wire bytes as if they arrived from the network.
    pub fn inject(&self, wire_bytes: &[u8]) {
        self.lock_wire().queued.push_back(wire_bytes.to_vec());
        self.ready.notify_all();
    }

    /// Make every subsequent receive fail, as if the host transport vanished.
    pub fn break_link(&self) {
        self.lock_wire().broken = true;
        self.ready.notify_all();
    }

    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.lock_wire().queued.len()
    }

    pub fn multicast_addresses(&self) -> Vec<MacAddr> {
        self.multicast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl EtherBackend for LoopbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Loopback
    }

    fn hardware_address(&self) -> MacAddr {
        LOOPBACK_MAC
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let mut wire = self.lock_wire();
        if self.capacity.is_some_and(|cap| wire.queued.len() >= cap) {
            return Err(SendError::Congestion);
        }
        wire.queued.push_back(self.padding.apply(frame));
        drop(wire);
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_all();
        Ok(())
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut wire = self.lock_wire();
        loop {
            if wire.broken || self.is_closed() {
                return Err(RecvError::Closed);
            }
            if let Some(bytes) = wire.queued.pop_front() {
                return Ok(Some(self.padding.strip(bytes)));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            wire = self
                .ready
                .wait_timeout(wire, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    fn enable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        let mut list = self
            .multicast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !list.contains(&addr) {
            list.push(addr);
        }
        Ok(())
    }

    fn disable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        self.multicast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|known| *known != addr);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_all();
    }
}
