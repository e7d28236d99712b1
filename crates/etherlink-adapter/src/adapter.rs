use std::sync::{Arc, Mutex};

use etherlink_backend::{
    open, BackendKind, EtherBackend, EtherConfig, OpenEnv, OpenError, SendError, Severity,
    SharedStack, UserModeStack, WarningSink,
};
use etherlink_frame::{MacAddr, ETH_MAX_FRAME_LEN};

use crate::dispatch::{DispatchOutcome, ProtocolTable};
use crate::guest::{GuestAddr, GuestLayout, GuestServices, HandlerRef, InterruptLine};
use crate::pipeline::{PipelineState, ReceptionPipeline};
use crate::stats::{bump, AdapterStats, Counters};
use crate::status::EtherStatus;

/// Hardware address reported while no backend is open.
pub const FALLBACK_MAC: MacAddr = MacAddr::new([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);

/// One virtual Ethernet adapter: the active backend, its reception pipeline and the guest's
/// protocol handlers.
///
/// Every method runs on the guest's execution context; only the pipeline's threads run
/// elsewhere.
pub struct EtherAdapter {
    config: EtherConfig,
    layout: GuestLayout,
    interrupt: Arc<dyn InterruptLine>,
    warnings: Arc<dyn WarningSink>,
    user_mode_stack: Option<SharedStack>,
    backend: Option<Arc<dyn EtherBackend>>,
    pipeline: Option<ReceptionPipeline>,
    protocols: ProtocolTable,
    counters: Arc<Counters>,
}

impl EtherAdapter {
    pub fn new(
        config: EtherConfig,
        layout: GuestLayout,
        interrupt: Arc<dyn InterruptLine>,
        warnings: Arc<dyn WarningSink>,
    ) -> Self {
        Self {
            config,
            layout,
            interrupt,
            warnings,
            user_mode_stack: None,
            backend: None,
            pipeline: None,
            protocols: ProtocolTable::new(),
            counters: Arc::default(),
        }
    }

    /// Stack used by every later `init` with the `slirp` selector. The adapter keeps it across
    /// shutdown, so a reopen reuses the same stack.
    pub fn set_user_mode_stack(&mut self, stack: Box<dyn UserModeStack>) {
        self.user_mode_stack = Some(Arc::new(Mutex::new(stack)));
    }

    /// Open the configured backend and start reception.
    ///
    /// Returns `false` when networking is not configured or could not be brought up; the latter
    /// is reported through the warning sink.
    pub fn init(&mut self) -> bool {
        self.shutdown();
        let env = OpenEnv {
            warnings: self.warnings.clone(),
            user_mode_stack: self.user_mode_stack.clone(),
        };
        match open(&self.config, env) {
            Ok(backend) => self.init_with_backend(backend),
            Err(OpenError::NoDevice) => {
                tracing::debug!("ethernet not configured");
                false
            }
            Err(err) => {
                self.warnings
                    .report(Severity::Warning, &format!("cannot initialize Ethernet: {err}"));
                false
            }
        }
    }

    /// Start reception on an already-open backend, replacing any current one.
    pub fn init_with_backend(&mut self, backend: Arc<dyn EtherBackend>) -> bool {
        self.shutdown();
        match ReceptionPipeline::start(
            backend.clone(),
            self.interrupt.clone(),
            self.counters.clone(),
        ) {
            Ok(pipeline) => {
                self.backend = Some(backend);
                self.pipeline = Some(pipeline);
                true
            }
            Err(err) => {
                backend.close();
                self.warnings
                    .report(Severity::Warning, &format!("cannot start Ethernet: {err}"));
                false
            }
        }
    }

    /// Stop reception and close the backend. Safe to call at any time.
    pub fn shutdown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        if let Some(backend) = self.backend.take() {
            backend.close();
            tracing::debug!(kind = ?backend.kind(), "ethernet backend closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline
            .as_ref()
            .map_or(PipelineState::Stopped, ReceptionPipeline::state)
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|backend| backend.kind())
    }

    /// Forget every protocol handler.
    pub fn reset(&mut self) {
        self.protocols.clear();
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    pub fn attach_protocol(&mut self, protocol: u16, handler: HandlerRef) -> EtherStatus {
        match self.protocols.attach(protocol, handler) {
            Ok(()) => EtherStatus::NoErr,
            Err(err) => {
                tracing::debug!("{err}");
                err.status()
            }
        }
    }

    pub fn detach_protocol(&mut self, protocol: u16) -> EtherStatus {
        match self.protocols.detach(protocol) {
            Ok(_) => EtherStatus::NoErr,
            Err(err) => {
                tracing::debug!("{err}");
                err.status()
            }
        }
    }

    pub fn transmit(&self, frame: &[u8]) -> EtherStatus {
        if frame.len() > ETH_MAX_FRAME_LEN {
            return EtherStatus::LenErr;
        }
        let Some(backend) = &self.backend else {
            return EtherStatus::ExcessCollisions;
        };
        match backend.send(frame) {
            Ok(()) => {
                bump(&self.counters.tx_frames);
                EtherStatus::NoErr
            }
            Err(SendError::TooLong { .. }) => EtherStatus::LenErr,
            Err(SendError::Congestion) => {
                bump(&self.counters.tx_dropped_full);
                EtherStatus::ExcessCollisions
            }
            // The guest cannot do anything useful about a broker hiccup.
            Err(err @ SendError::Broker(_)) => {
                bump(&self.counters.tx_errors);
                self.warnings.report(Severity::Warning, &err.to_string());
                EtherStatus::NoErr
            }
            Err(err) => {
                bump(&self.counters.tx_errors);
                tracing::debug!("transmit failed: {err}");
                EtherStatus::ExcessCollisions
            }
        }
    }

    /// Transmit a linear frame held in guest memory.
    pub fn transmit_from_guest(
        &self,
        guest: &mut dyn GuestServices,
        addr: GuestAddr,
        len: usize,
    ) -> EtherStatus {
        if len > ETH_MAX_FRAME_LEN {
            return EtherStatus::LenErr;
        }
        let mut frame = vec![0u8; len];
        guest.read_memory(addr, &mut frame);
        self.transmit(&frame)
    }

    pub fn enable_multicast(&self, addr: MacAddr) -> EtherStatus {
        let Some(backend) = &self.backend else {
            return EtherStatus::NoErr;
        };
        match backend.enable_multicast(addr) {
            Ok(()) => EtherStatus::NoErr,
            Err(err) => {
                tracing::debug!("{err}");
                EtherStatus::MultiErr
            }
        }
    }

    pub fn disable_multicast(&self, addr: MacAddr) -> EtherStatus {
        let Some(backend) = &self.backend else {
            return EtherStatus::NoErr;
        };
        match backend.disable_multicast(addr) {
            Ok(()) => EtherStatus::NoErr,
            Err(err) => {
                tracing::debug!("{err}");
                EtherStatus::MultiErr
            }
        }
    }

    pub fn hardware_address(&self) -> MacAddr {
        self.backend
            .as_ref()
            .map_or(FALLBACK_MAC, |backend| backend.hardware_address())
    }

    /// Dispatch the frame parked by the reception thread, if any. Returns the number of frames
    /// handed to the dispatch table.
    pub fn service_interrupt(&mut self, guest: &mut dyn GuestServices) -> usize {
        let Some(pipeline) = &self.pipeline else {
            return 0;
        };
        let bridge = pipeline.bridge().clone();
        let mut serviced = 0;
        while let Some(frame) = bridge.take_frame() {
            serviced += 1;
            match self.protocols.dispatch(&frame, &self.layout, guest) {
                DispatchOutcome::Delivered { .. } => bump(&self.counters.rx_dispatched),
                DispatchOutcome::NoHandler { .. } => bump(&self.counters.rx_unhandled),
                DispatchOutcome::Runt { .. } => bump(&self.counters.rx_runts),
                DispatchOutcome::Oversize { .. } => bump(&self.counters.rx_oversize),
            }
        }
        serviced
    }

    /// Tell the reception thread the guest is done with the delivered frame.
    ///
    /// Returns `false` if nothing was waiting for an acknowledgment.
    pub fn acknowledge_interrupt(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|pipeline| pipeline.bridge().acknowledge())
    }

    /// Complete interrupt handling: enter interrupt context, dispatch, leave, acknowledge.
    pub fn handle_interrupt(&mut self, guest: &mut dyn GuestServices) -> usize {
        guest.enter_interrupt();
        let serviced = self.service_interrupt(guest);
        guest.leave_interrupt();
        self.acknowledge_interrupt();
        serviced
    }

    pub fn stats(&self) -> AdapterStats {
        self.counters.snapshot()
    }
}

impl Drop for EtherAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
