//! Hand-off of received frames from the reception thread to the guest's interrupt path.

use std::sync::{Condvar, Mutex, MutexGuard};

use etherlink_frame::Frame;

use crate::guest::InterruptLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Acknowledged,
    /// The bridge was closed before (or while) waiting; the frame was dropped.
    Closed,
}

#[derive(Default)]
struct Slot {
    pending: Option<Frame>,
    awaiting_ack: bool,
    closed: bool,
}

/// Single-slot handshake: at most one frame is outstanding toward the guest at any time.
///
/// The reception thread parks a frame and raises the interrupt line, then blocks until the
/// guest acknowledges. Closing the bridge releases a blocked deliverer without an
/// acknowledgment, which is how shutdown avoids waiting on a guest that will never answer.
#[derive(Default)]
pub struct InterruptBridge {
    slot: Mutex<Slot>,
    acknowledged: Condvar,
}

impl InterruptBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park `frame`, raise `line`, and wait for the guest's acknowledgment.
    pub fn deliver(&self, frame: Frame, line: &dyn InterruptLine) -> Delivery {
        {
            let mut slot = self.lock();
            if slot.closed {
                return Delivery::Closed;
            }
            slot.pending = Some(frame);
            slot.awaiting_ack = true;
        }

        // The line may call straight back into `take_frame`/`acknowledge`.
        line.raise();

        let mut slot = self.lock();
        while slot.awaiting_ack && !slot.closed {
            slot = self
                .acknowledged
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if slot.closed {
            Delivery::Closed
        } else {
            Delivery::Acknowledged
        }
    }

    /// Take the parked frame, if any, for dispatch on the guest side.
    pub fn take_frame(&self) -> Option<Frame> {
        self.lock().pending.take()
    }

    /// Release the deliverer. Returns `false` when no delivery was waiting (spurious ack) or
    /// when the parked frame has not been taken yet; an untaken frame stays parked.
    pub fn acknowledge(&self) -> bool {
        let mut slot = self.lock();
        if !slot.awaiting_ack || slot.pending.is_some() {
            return false;
        }
        slot.awaiting_ack = false;
        drop(slot);
        self.acknowledged.notify_all();
        true
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.lock().awaiting_ack
    }

    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.awaiting_ack = false;
        slot.pending = None;
        drop(slot);
        self.acknowledged.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
