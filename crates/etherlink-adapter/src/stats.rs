use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of adapter activity counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStats {
    pub tx_frames: u64,
    /// Frames refused because the transport's transmit buffer was full.
    pub tx_dropped_full: u64,
    pub tx_errors: u64,
    pub rx_frames: u64,
    pub rx_dispatched: u64,
    pub rx_unhandled: u64,
    pub rx_runts: u64,
    pub rx_oversize: u64,
    pub interrupts_raised: u64,
}

/// Live counters shared between the guest context and the reception thread.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub tx_frames: AtomicU64,
    pub tx_dropped_full: AtomicU64,
    pub tx_errors: AtomicU64,
    pub rx_frames: AtomicU64,
    pub rx_dispatched: AtomicU64,
    pub rx_unhandled: AtomicU64,
    pub rx_runts: AtomicU64,
    pub rx_oversize: AtomicU64,
    pub interrupts_raised: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> AdapterStats {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AdapterStats {
            tx_frames: get(&self.tx_frames),
            tx_dropped_full: get(&self.tx_dropped_full),
            tx_errors: get(&self.tx_errors),
            rx_frames: get(&self.rx_frames),
            rx_dispatched: get(&self.rx_dispatched),
            rx_unhandled: get(&self.rx_unhandled),
            rx_runts: get(&self.rx_runts),
            rx_oversize: get(&self.rx_oversize),
            interrupts_raised: get(&self.interrupts_raised),
        }
    }
}
