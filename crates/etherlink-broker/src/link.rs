use core::fmt;
use std::time::Duration;

/// One message taken off the adapter's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Protocol step a broker failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Connect,
    ChannelOpen,
    ExchangeDeclare,
    QueueDeclare,
    QueueBind,
    Consume,
    Publish,
    Ack,
    ChannelClose,
    ConnectionClose,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Connect => "connect",
            SessionStage::ChannelOpen => "channel open",
            SessionStage::ExchangeDeclare => "exchange declare",
            SessionStage::QueueDeclare => "queue declare",
            SessionStage::QueueBind => "queue bind",
            SessionStage::Consume => "consume",
            SessionStage::Publish => "publish",
            SessionStage::Ack => "ack",
            SessionStage::ChannelClose => "channel close",
            SessionStage::ConnectionClose => "connection close",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker session is closed")]
    Closed,
    #[error("broker delivery stream ended")]
    StreamEnded,
    #[error("{stage}: {source}")]
    Protocol {
        stage: SessionStage,
        #[source]
        source: lapin::Error,
    },
}

/// Minimal publish/consume surface of a broker session.
///
/// `publish` is called from the guest's execution context while `next_message` runs on the
/// reception thread, so implementations must tolerate both being in progress at once.
pub trait BrokerLink: Send + Sync {
    /// Publish one frame to the session's exchange.
    fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message on the session's queue.
    ///
    /// Implementations acknowledge every message they hand out. `Ok(None)` means the wait timed
    /// out.
    fn next_message(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Tear the session down. Calling this more than once is a no-op.
    fn disconnect(&self) -> Result<(), BrokerError>;
}

impl<T: BrokerLink + ?Sized> BrokerLink for std::sync::Arc<T> {
    fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        <T as BrokerLink>::publish(&**self, routing_key, body)
    }

    fn next_message(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        <T as BrokerLink>::next_message(&**self, timeout)
    }

    fn disconnect(&self) -> Result<(), BrokerError> {
        <T as BrokerLink>::disconnect(&**self)
    }
}
