//! Ethernet over an AMQP fanout exchange.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use etherlink_broker::{BrokerLink, BrokerSession, BrokerUrl};
use etherlink_frame::{Frame, MacAddr, ETH_MAX_FRAME_LEN};

use crate::error::{OpenError, RecvError, SendError};
use crate::report::{Severity, WarningSink};
use crate::{BackendKind, EtherBackend};

/// Broker-backed transport.
///
/// Every instance publishes with its own identity as routing key and consumes everything the
/// exchange fans out, so its own messages come back and are dropped here.
pub struct BrokerTunnel<L = BrokerSession> {
    link: L,
    identity: String,
    mac: MacAddr,
    warnings: Arc<dyn WarningSink>,
    echoes: AtomicU64,
    closed: AtomicBool,
}

impl BrokerTunnel<BrokerSession> {
    pub fn connect(
        url: &BrokerUrl,
        identity: String,
        warnings: Arc<dyn WarningSink>,
    ) -> Result<Self, OpenError> {
        let session = BrokerSession::connect(url)?;
        Ok(Self::with_link(session, identity, warnings))
    }
}

impl<L: BrokerLink> BrokerTunnel<L> {
    pub fn with_link(link: L, identity: String, warnings: Arc<dyn WarningSink>) -> Self {
        tracing::debug!(%identity, "broker tunnel ready");
        Self {
            link,
            identity,
            mac: MacAddr::from_host_tag(std::process::id()),
            warnings,
            echoes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Number of self-published messages dropped so far.
    pub fn echoes_suppressed(&self) -> u64 {
        self.echoes.load(Ordering::Relaxed)
    }
}

impl<L: BrokerLink> EtherBackend for BrokerTunnel<L> {
    fn kind(&self) -> BackendKind {
        BackendKind::BrokerTunnel
    }

    fn hardware_address(&self) -> MacAddr {
        self.mac
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        if frame.len() > ETH_MAX_FRAME_LEN {
            return Err(SendError::TooLong {
                len: frame.len(),
                max: ETH_MAX_FRAME_LEN,
            });
        }
        self.link.publish(&self.identity, frame)?;
        Ok(())
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecvError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(message) = self.link.next_message(remaining)? else {
                return Ok(None);
            };
            if message.routing_key == self.identity {
                self.echoes.fetch_add(1, Ordering::Relaxed);
            } else if message.body.len() > ETH_MAX_FRAME_LEN {
                tracing::trace!(
                    len = message.body.len(),
                    from = %message.routing_key,
                    "oversized broker message dropped"
                );
            } else {
                return Ok(Some(Frame::from_vec(message.body)));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.link.disconnect() {
            self.warnings
                .report(Severity::Warning, &format!("broker teardown incomplete: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TracingWarnings;
    use etherlink_broker::MemoryBroker;

    fn tunnel(broker: &MemoryBroker, identity: &str) -> BrokerTunnel<etherlink_broker::MemoryLink> {
        BrokerTunnel::with_link(broker.connect(), identity.into(), Arc::new(TracingWarnings))
    }

    #[test]
    fn own_messages_are_suppressed() {
        let broker = MemoryBroker::new();
        let a = tunnel(&broker, "a");
        let b = tunnel(&broker, "b");

        a.send(b"from a, frame body").unwrap();

        let at_b = b.receive_blocking(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(at_b.as_bytes(), b"from a, frame body");
        assert!(a
            .receive_blocking(Duration::from_millis(20))
            .unwrap()
            .is_none());
        assert_eq!(a.echoes_suppressed(), 1);
        assert_eq!(b.echoes_suppressed(), 0);
    }

    #[test]
    fn echo_is_skipped_in_favor_of_later_foreign_message() {
        let broker = MemoryBroker::new();
        let a = tunnel(&broker, "a");
        a.send(b"echo").unwrap();
        broker.publish("b", b"foreign");

        let frame = a.receive_blocking(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"foreign");
    }

    #[test]
    fn closed_tunnel_refuses_io() {
        let broker = MemoryBroker::new();
        let a = tunnel(&broker, "a");
        a.close();
        a.close();
        assert!(matches!(a.send(b"x"), Err(SendError::Closed)));
        assert!(matches!(
            a.receive_blocking(Duration::ZERO),
            Err(RecvError::Closed)
        ));
    }
}
