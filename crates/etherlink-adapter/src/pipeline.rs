//! Background reception: backend → interrupt bridge, one frame at a time.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use etherlink_backend::{CancelFlag, EtherBackend, RECEIVE_POLL_INTERVAL};

use crate::bridge::{Delivery, InterruptBridge};
use crate::guest::InterruptLine;
use crate::stats::{bump, Counters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot start backend helper threads: {0}")]
    Workers(#[source] io::Error),
    #[error("cannot spawn reception thread: {0}")]
    Spawn(#[source] io::Error),
}

pub struct ReceptionPipeline {
    state: PipelineState,
    cancel: CancelFlag,
    bridge: Arc<InterruptBridge>,
    receiver: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ReceptionPipeline {
    /// Start the backend's helper threads and the reception thread.
    ///
    /// On failure every thread started so far has been stopped and joined.
    pub(crate) fn start(
        backend: Arc<dyn EtherBackend>,
        line: Arc<dyn InterruptLine>,
        counters: Arc<Counters>,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Self {
            state: PipelineState::Starting,
            cancel: CancelFlag::new(),
            bridge: Arc::new(InterruptBridge::new()),
            receiver: None,
            workers: Vec::new(),
        };
        tracing::debug!(kind = ?backend.kind(), "starting reception pipeline");

        pipeline.workers = match backend.spawn_workers(&pipeline.cancel) {
            Ok(workers) => workers,
            Err(err) => {
                pipeline.stop();
                return Err(PipelineError::Workers(err));
            }
        };

        let spawned = {
            let cancel = pipeline.cancel.clone();
            let bridge = pipeline.bridge.clone();
            thread::Builder::new()
                .name("etherlink-rx".into())
                .spawn(move || receive_loop(&*backend, &bridge, &*line, &cancel, &counters))
        };
        match spawned {
            Ok(receiver) => pipeline.receiver = Some(receiver),
            Err(err) => {
                pipeline.stop();
                return Err(PipelineError::Spawn(err));
            }
        }

        pipeline.state = PipelineState::Running;
        Ok(pipeline)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn bridge(&self) -> &Arc<InterruptBridge> {
        &self.bridge
    }

    /// Cancel and join every thread. A frame awaiting acknowledgment is dropped.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.state = PipelineState::Stopping;
        self.cancel.cancel();
        self.bridge.close();

        if let Some(receiver) = self.receiver.take() {
            if receiver.join().is_err() {
                tracing::warn!("reception thread panicked");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("backend helper thread panicked");
            }
        }
        self.state = PipelineState::Stopped;
        tracing::debug!("reception pipeline stopped");
    }
}

impl Drop for ReceptionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    backend: &dyn EtherBackend,
    bridge: &InterruptBridge,
    line: &dyn InterruptLine,
    cancel: &CancelFlag,
    counters: &Counters,
) {
    while !cancel.is_cancelled() {
        let frame = match backend.receive_blocking(RECEIVE_POLL_INTERVAL) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                if !cancel.is_cancelled() {
                    tracing::warn!("ethernet reception stopped: {err}");
                }
                break;
            }
        };
        if frame.is_runt() {
            bump(&counters.rx_runts);
            tracing::trace!(len = frame.len(), "runt frame discarded");
            continue;
        }
        bump(&counters.rx_frames);
        bump(&counters.interrupts_raised);
        if bridge.deliver(frame, line) == Delivery::Closed {
            break;
        }
    }
    // Nothing will be delivered any more; release any waiter on the guest side as well.
    bridge.close();
}
