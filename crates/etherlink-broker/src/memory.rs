//! In-process fanout hub implementing [`BrokerLink`].
//!
//! Every message published by any link is delivered to every connected link, including the
//! publisher, which is exactly how a fanout exchange treats the adapter's own traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::link::{BrokerError, BrokerLink, BrokerMessage};

#[derive(Clone, Default)]
pub struct MemoryBroker {
    subscribers: Arc<Mutex<Vec<Sender<BrokerMessage>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new link with its own queue.
    pub fn connect(&self) -> MemoryLink {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        MemoryLink {
            broker: self.clone(),
            inbox: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Inject a message as if another adapter had published it.
    pub fn publish(&self, routing_key: &str, body: &[u8]) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| {
            tx.send(BrokerMessage {
                routing_key: routing_key.to_owned(),
                body: body.to_vec(),
            })
            .is_ok()
        });
    }
}

pub struct MemoryLink {
    broker: MemoryBroker,
    inbox: Mutex<Receiver<BrokerMessage>>,
    closed: AtomicBool,
}

impl MemoryLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl BrokerLink for MemoryLink {
    fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.broker.publish(routing_key, body);
        Ok(())
    }

    fn next_message(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match inbox.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::StreamEnded),
        }
    }

    fn disconnect(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
