//! The virtual Ethernet adapter seen by the emulated machine.
//!
//! [`EtherAdapter`] owns one backend from `etherlink-backend`, a reception thread that hands
//! frames to the guest one at a time through an [`InterruptBridge`], and the guest's
//! [`ProtocolTable`].
//!
//! Guest-facing calls answer with [`EtherStatus`] codes; configuration and transport failures
//! go to the host's `WarningSink` and leave networking disabled.
#![forbid(unsafe_code)]

mod adapter;
pub mod bridge;
pub mod dispatch;
pub mod guest;
pub mod pipeline;
mod stats;
pub mod status;

pub use adapter::{EtherAdapter, FALLBACK_MAC};
pub use bridge::{Delivery, InterruptBridge};
pub use dispatch::{DispatchOutcome, ProtocolError, ProtocolTable};
pub use guest::{
    GuestAddr, GuestLayout, GuestServices, HandlerRef, HandlerRegisters, InterruptLine,
};
pub use pipeline::{PipelineError, PipelineState, ReceptionPipeline};
pub use stats::AdapterStats;
pub use status::EtherStatus;
