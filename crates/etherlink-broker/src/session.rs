//! AMQP 0-9-1 session lifecycle: connection → channel → fanout exchange → private queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::runtime::Runtime;

use crate::link::{BrokerError, BrokerLink, BrokerMessage, SessionStage};
use crate::url::BrokerUrl;
use crate::{FRAME_CONTENT_TYPE, PERSISTENT_DELIVERY_MODE, QUEUE_BINDING_PATTERN};

const REPLY_SUCCESS: u16 = 200;
const CONSUMER_TAG: &str = "etherlink";

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to start broker runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("{stage}: {source}")]
    Protocol {
        stage: SessionStage,
        #[source]
        source: lapin::Error,
    },
}

fn at(stage: SessionStage) -> impl FnOnce(lapin::Error) -> ConnectError {
    move |source| ConnectError::Protocol { stage, source }
}

impl BrokerUrl {
    pub fn to_amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.tls {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString::default(),
        }
    }
}

/// A connected broker session.
///
/// The session owns a small Tokio runtime so that synchronous callers (the guest's transmit path
/// and the reception thread) can drive `lapin`'s async API with `block_on`. Publishing uses
/// channel 1; consuming uses a second channel so that a blocked consumer never stalls a publish.
pub struct BrokerSession {
    runtime: Runtime,
    connection: Connection,
    publish_channel: Channel,
    consume_channel: Channel,
    consumer: Mutex<Consumer>,
    exchange: String,
    closed: AtomicBool,
}

impl BrokerSession {
    /// Connect, declare the fanout exchange and subscribe a fresh exclusive queue to it.
    ///
    /// Any failure after the connection is established closes it again before returning.
    pub fn connect(url: &BrokerUrl) -> Result<Self, ConnectError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("etherlink-broker")
            .enable_all()
            .build()?;

        let connection = runtime
            .block_on(Connection::connect_uri(
                url.to_amqp_uri(),
                ConnectionProperties::default(),
            ))
            .map_err(at(SessionStage::Connect))?;

        let setup = runtime.block_on(declare_topology(&connection, &url.exchange));
        let (publish_channel, consume_channel, consumer) = match setup {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(close_err) =
                    runtime.block_on(connection.close(REPLY_SUCCESS, "setup failed"))
                {
                    tracing::debug!("closing broker connection after failed setup: {close_err}");
                }
                return Err(err);
            }
        };

        tracing::info!(
            host = %url.host,
            port = url.port,
            exchange = %url.exchange,
            "connected to broker"
        );

        Ok(Self {
            runtime,
            connection,
            publish_channel,
            consume_channel,
            consumer: Mutex::new(consumer),
            exchange: url.exchange.clone(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

async fn declare_topology(
    connection: &Connection,
    exchange: &str,
) -> Result<(Channel, Channel, Consumer), ConnectError> {
    let publish_channel = connection
        .create_channel()
        .await
        .map_err(at(SessionStage::ChannelOpen))?;
    publish_channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(at(SessionStage::ExchangeDeclare))?;

    let consume_channel = connection
        .create_channel()
        .await
        .map_err(at(SessionStage::ChannelOpen))?;
    let queue = consume_channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(at(SessionStage::QueueDeclare))?;
    tracing::debug!(queue = %queue.name(), "declared broker queue");

    consume_channel
        .queue_bind(
            queue.name().as_str(),
            exchange,
            QUEUE_BINDING_PATTERN,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(at(SessionStage::QueueBind))?;

    let consumer = consume_channel
        .basic_consume(
            queue.name().as_str(),
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(at(SessionStage::Consume))?;

    Ok((publish_channel, consume_channel, consumer))
}

impl BrokerLink for BrokerSession {
    fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(FRAME_CONTENT_TYPE))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        self.runtime
            .block_on(self.publish_channel.basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            ))
            .map(drop)
            .map_err(|source| BrokerError::Protocol {
                stage: SessionStage::Publish,
                source,
            })
    }

    fn next_message(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.runtime.block_on(async {
            let delivery = match tokio::time::timeout(timeout, consumer.next()).await {
                Err(_elapsed) => return Ok(None),
                Ok(None) => return Err(BrokerError::StreamEnded),
                Ok(Some(Err(source))) => {
                    return Err(BrokerError::Protocol {
                        stage: SessionStage::Consume,
                        source,
                    })
                }
                Ok(Some(Ok(delivery))) => delivery,
            };
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|source| BrokerError::Protocol {
                    stage: SessionStage::Ack,
                    source,
                })?;
            Ok(Some(BrokerMessage {
                routing_key: delivery.routing_key.as_str().to_owned(),
                body: delivery.data,
            }))
        })
    }

    /// Channel close, then connection close; the connection is only closed once the channels
    /// closed cleanly. The runtime itself is released when the session is dropped.
    fn disconnect(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.runtime.block_on(async {
            for channel in [&self.consume_channel, &self.publish_channel] {
                channel
                    .close(REPLY_SUCCESS, "bye")
                    .await
                    .map_err(|source| BrokerError::Protocol {
                        stage: SessionStage::ChannelClose,
                        source,
                    })?;
            }
            self.connection
                .close(REPLY_SUCCESS, "bye")
                .await
                .map_err(|source| BrokerError::Protocol {
                    stage: SessionStage::ConnectionClose,
                    source,
                })
        })
    }
}

impl Drop for BrokerSession {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            tracing::warn!("broker teardown failed: {err}");
        }
    }
}
