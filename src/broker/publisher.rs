use super::{encode_payload, BrokerConnection, BrokerError, MemoryBroker, QueueSpec, EXCHANGE_NAME};
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection};
use tracing::{debug, instrument, warn};

enum Sink {
    Amqp {
        connection: Connection,
        channel: Channel,
    },
    Memory(MemoryBroker),
}

/// Sends identifier payloads to one queue of the harvest exchange.
///
/// Owns its connection; call [`close`](Self::close) when done. Dropping an
/// AMQP publisher without closing it tears the connection down abruptly.
pub struct Publisher {
    queue: QueueSpec,
    sink: Sink,
}

impl Publisher {
    pub async fn open(connection: BrokerConnection, queue: QueueSpec) -> Result<Self, BrokerError> {
        let sink = match connection {
            BrokerConnection::Amqp(connection) => {
                let channel = super::amqp::publisher_channel(&connection, queue).await?;
                Sink::Amqp {
                    connection,
                    channel,
                }
            }
            BrokerConnection::Memory(broker) => {
                broker.declare(queue);
                Sink::Memory(broker)
            }
        };
        Ok(Self { queue, sink })
    }

    pub fn queue(&self) -> QueueSpec {
        self.queue
    }

    /// Publishes `{routing_key: id}`.
    #[instrument(skip(self), fields(routing_key = self.queue.routing_key))]
    pub async fn send(&self, id: &str) -> Result<(), BrokerError> {
        let body = encode_payload(self.queue.routing_key, id)?;
        let publish_err = |cause: String| BrokerError::Publish {
            routing_key: self.queue.routing_key.to_string(),
            cause,
        };

        match &self.sink {
            Sink::Amqp { channel, .. } => {
                let confirmation = channel
                    .basic_publish(
                        EXCHANGE_NAME,
                        self.queue.routing_key,
                        BasicPublishOptions::default(),
                        &body,
                        BasicProperties::default()
                            .with_delivery_mode(2)
                            .with_content_type("application/json".into()),
                    )
                    .await
                    .map_err(|e| publish_err(e.to_string()))?
                    .await
                    .map_err(|e| publish_err(format!("confirmation failed: {e}")))?;
                if confirmation.is_nack() {
                    return Err(publish_err("broker rejected the message".to_string()));
                }
            }
            Sink::Memory(broker) => {
                if broker.publish(self.queue.routing_key, body) == 0 {
                    return Err(publish_err("no queue bound".to_string()));
                }
            }
        }

        debug!(id, "Sent message");
        Ok(())
    }

    /// Releases the channel and connection.
    pub async fn close(self) -> Result<(), BrokerError> {
        if let Sink::Amqp {
            connection,
            channel,
        } = self.sink
        {
            if let Err(e) = channel.close(200, "OK").await {
                warn!(error = %e, "Failed to close publisher channel");
            }
            connection
                .close(200, "OK")
                .await
                .map_err(|e| BrokerError::Connection {
                    broker: "publisher".to_string(),
                    cause: format!("close failed: {e}"),
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("queue", &self.queue.name)
            .finish()
    }
}
