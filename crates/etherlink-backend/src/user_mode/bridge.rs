//! The two helper threads of the user-mode stack.

use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{queue, PollSet, StackShared};
use crate::cancel::CancelFlag;
use crate::sys;

/// Wait between cancellation checks while the guest → stack queue is idle.
const INBOUND_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Stack wait when the stack's own timeout suggestion is not used.
const FIXED_STACK_WAIT: Duration = Duration::from_millis(10);
/// Cap on any stack-suggested wait, so cancellation is observed promptly.
const MAX_STACK_WAIT: Duration = Duration::from_millis(50);

pub(super) fn spawn(shared: &Arc<StackShared>, cancel: &CancelFlag) -> io::Result<Vec<JoinHandle<()>>> {
    let inbound = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        thread::Builder::new()
            .name("etherlink-stack-in".into())
            .spawn(move || inbound_loop(&shared, &cancel))?
    };
    let events = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        thread::Builder::new()
            .name("etherlink-stack".into())
            .spawn(move || event_loop(&shared, &cancel))
    };
    match events {
        Ok(events) => Ok(vec![inbound, events]),
        Err(err) => {
            cancel.cancel();
            let _ = inbound.join();
            Err(err)
        }
    }
}

/// Guest → stack: move queued frames into the stack's input routine.
fn inbound_loop(shared: &StackShared, cancel: &CancelFlag) {
    let mut stream = &shared.inbound;
    while !cancel.is_cancelled() {
        match sys::wait_readable(shared.inbound.as_fd(), INBOUND_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::warn!("user-mode stack input queue failed: {err}");
                return;
            }
        }
        let frame = match queue::read_record(&mut stream) {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(err) => {
                tracing::warn!("user-mode stack input queue failed: {err}");
                return;
            }
        };
        tracing::trace!(len = frame.len(), "frame into user-mode stack");
        shared.lock_stack().input(&frame, &shared.output);
    }
}

/// Drive the stack's own descriptors and timers.
fn event_loop(shared: &StackShared, cancel: &CancelFlag) {
    let mut set = PollSet::new();
    while !cancel.is_cancelled() {
        set.clear();
        let suggested = shared.lock_stack().fill_poll_set(&mut set);
        let wait = if shared.use_stack_timeout {
            suggested.unwrap_or(MAX_STACK_WAIT).min(MAX_STACK_WAIT)
        } else {
            FIXED_STACK_WAIT
        };
        if let Err(err) = set.wait(wait) {
            tracing::warn!("user-mode stack poll failed: {err}");
            return;
        }
        if cancel.is_cancelled() {
            break;
        }
        shared.lock_stack().process_poll_set(&set, &shared.output);
    }
}
