//! Publish/subscribe transport standing in for a point-to-point Ethernet link.
//!
//! Every adapter publishes its frames to a shared fanout exchange and consumes from a private,
//! exclusive queue bound to that exchange. Since a fanout exchange also delivers an adapter's own
//! messages back to it, each publish carries the adapter's identity tag as routing key so that
//! the receiving side can drop its own echoes.
//!
//! [`BrokerSession`] is the AMQP 0-9-1 implementation (via `lapin`). [`MemoryBroker`] is an
//! in-process fanout hub with the same [`BrokerLink`] surface, used by host-side tests.

pub mod link;
pub mod memory;
pub mod session;
pub mod url;

pub use link::{BrokerError, BrokerLink, BrokerMessage, SessionStage};
pub use memory::{MemoryBroker, MemoryLink};
pub use session::{BrokerSession, ConnectError};
pub use url::BrokerUrl;

/// MIME type attached to every published frame.
pub const FRAME_CONTENT_TYPE: &str = "application/x-appletalk-packet";

/// AMQP "persistent" delivery mode.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Binding pattern used for the per-adapter queue.
pub const QUEUE_BINDING_PATTERN: &str = "*";
