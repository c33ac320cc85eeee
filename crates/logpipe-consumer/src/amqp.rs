// AMQP 0-9-1 broker adapter (RabbitMQ) on lapin
//
// Every connect builds a brand new connection and channel. Connection errors
// reported by lapin are forwarded once through the session's loss
// notification.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{acker::Acker, Channel, Connection, ConnectionProperties};
use logpipe_config::BrokerConfig;
use tokio::sync::oneshot;
use tracing::debug;

use crate::broker::{
    Acknowledger, Broker, BrokerError, Delivery, SessionCloser, SubscribeOptions, Subscription,
};

const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Clone)]
pub struct AmqpBroker {
    url: String,
    heartbeat_secs: u16,
    connection_name: String,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_secs: 10,
            connection_name: "logs-service".to_string(),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            url: config.url.clone(),
            heartbeat_secs: config.heartbeat_secs,
            connection_name: config.connection_name.clone(),
        }
    }

    pub fn with_heartbeat(mut self, secs: u16) -> Self {
        self.heartbeat_secs = secs;
        self
    }

    fn uri(&self) -> Result<AMQPUri, BrokerError> {
        let mut uri: AMQPUri = self
            .url
            .parse()
            .map_err(|e: String| BrokerError::Connect(format!("invalid broker url: {}", e)))?;
        uri.query.heartbeat = Some(self.heartbeat_secs);
        Ok(uri)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self, options: &SubscribeOptions) -> Result<Subscription, BrokerError> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into());
        let connection = Connection::connect_uri(self.uri()?, properties)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let (lost_tx, lost_rx) = oneshot::channel();
        let mut lost_tx = Some(lost_tx);
        connection.on_error(move |err| {
            if let Some(tx) = lost_tx.take() {
                let _ = tx.send(BrokerError::ConnectionLost(err.to_string()));
            }
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(format!("channel: {}", e)))?;

        channel
            .queue_declare(
                &options.queue,
                QueueDeclareOptions {
                    durable: options.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connect(format!("queue declare: {}", e)))?;

        channel
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("qos: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &options.queue,
                &options.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connect(format!("consume: {}", e)))?;

        debug!(queue = %options.queue, "AMQP consumer registered");

        let deliveries = consumer
            .map(|result| {
                result
                    .map(|delivery| {
                        Delivery::new(
                            delivery.data,
                            Box::new(AmqpAcker {
                                acker: delivery.acker,
                            }),
                        )
                    })
                    .map_err(|e| BrokerError::ConnectionLost(e.to_string()))
            })
            .boxed();

        Ok(Subscription {
            deliveries,
            lost: lost_rx,
            closer: Box::new(AmqpCloser {
                channel,
                connection,
            }),
        })
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}

struct AmqpCloser {
    channel: Channel,
    connection: Connection,
}

#[async_trait]
impl SessionCloser for AmqpCloser {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let channel_result = self.channel.close(REPLY_SUCCESS, "consumer stopping").await;
        self.connection
            .close(REPLY_SUCCESS, "consumer stopping")
            .await
            .map_err(|e| BrokerError::ConnectionLost(e.to_string()))?;
        channel_result.map_err(|e| BrokerError::ConnectionLost(e.to_string()))
    }
}
