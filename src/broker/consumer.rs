use super::memory::QueuedMessage;
use super::{decode_payload, BrokerConnection, BrokerError, Completion, MemoryBroker, QueueSpec};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use tracing::{debug, error, info, warn};

/// Processes one decoded identifier and decides the fate of its message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, id: &str) -> Completion;
}

enum Settlement {
    Amqp(Acker),
    Memory { broker: MemoryBroker, tag: u64 },
}

/// A received message that must be settled exactly once.
///
/// [`settle`](Self::settle) acks or requeues it. A delivery dropped without
/// being settled goes back to its queue: immediately for the in-process
/// broker, when the channel closes for AMQP.
pub struct Delivery {
    body: Vec<u8>,
    redelivered: bool,
    settlement: Option<Settlement>,
}

impl Delivery {
    fn from_amqp(delivery: lapin::message::Delivery) -> Self {
        Self {
            body: delivery.data,
            redelivered: delivery.redelivered,
            settlement: Some(Settlement::Amqp(delivery.acker)),
        }
    }

    fn from_memory(broker: MemoryBroker, tag: u64, message: QueuedMessage) -> Self {
        Self {
            body: message.body,
            redelivered: message.redelivered,
            settlement: Some(Settlement::Memory { broker, tag }),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn settle(mut self, completion: Completion) -> Result<(), BrokerError> {
        let Some(settlement) = self.settlement.take() else {
            return Ok(());
        };
        match (settlement, completion) {
            (Settlement::Amqp(acker), Completion::Ack) => acker
                .ack(BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::Settle(format!("ack: {e}"))),
            (Settlement::Amqp(acker), Completion::Requeue) => acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::Settle(format!("nack: {e}"))),
            (Settlement::Memory { broker, tag }, Completion::Ack) => {
                broker.ack(tag);
                Ok(())
            }
            (Settlement::Memory { broker, tag }, Completion::Requeue) => {
                broker.requeue(tag);
                Ok(())
            }
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        match self.settlement.take() {
            Some(Settlement::Memory { broker, tag }) => {
                broker.requeue(tag);
            }
            Some(Settlement::Amqp(_)) => {
                warn!("Delivery dropped unsettled; broker will redeliver it");
            }
            None => {}
        }
    }
}

enum Source {
    Amqp {
        connection: Connection,
        channel: Channel,
        stream: lapin::Consumer,
    },
    Memory(MemoryBroker),
}

/// Receives deliveries from one queue and feeds them to a handler, one at a
/// time.
pub struct Consumer {
    queue: QueueSpec,
    source: Source,
}

impl Consumer {
    pub async fn open(connection: BrokerConnection, queue: QueueSpec) -> Result<Self, BrokerError> {
        let source = match connection {
            BrokerConnection::Amqp(connection) => {
                let channel = super::amqp::consumer_channel(&connection, queue).await?;
                let stream = channel
                    .basic_consume(
                        queue.name,
                        &format!("harvest-{}", std::process::id()),
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Consume {
                        queue: queue.name.to_string(),
                        cause: e.to_string(),
                    })?;
                Source::Amqp {
                    connection,
                    channel,
                    stream,
                }
            }
            BrokerConnection::Memory(broker) => {
                broker.declare(queue);
                Source::Memory(broker)
            }
        };
        debug!(queue = queue.name, "Queue consumer registered");
        Ok(Self { queue, source })
    }

    pub fn queue(&self) -> QueueSpec {
        self.queue
    }

    /// Waits for the next delivery. `None` means the broker closed the stream.
    pub async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        match &mut self.source {
            Source::Amqp { stream, .. } => match stream.next().await {
                Some(Ok(delivery)) => Ok(Some(Delivery::from_amqp(delivery))),
                Some(Err(e)) => Err(BrokerError::Consume {
                    queue: self.queue.name.to_string(),
                    cause: e.to_string(),
                }),
                None => Ok(None),
            },
            Source::Memory(broker) => {
                let (tag, message) = broker.take(self.queue.name).await;
                Ok(Some(Delivery::from_memory(broker.clone(), tag, message)))
            }
        }
    }

    /// Takes a delivery only if one is ready right now.
    pub async fn try_next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        match &mut self.source {
            Source::Amqp { channel, .. } => {
                let message = channel
                    .basic_get(self.queue.name, BasicGetOptions::default())
                    .await
                    .map_err(|e| BrokerError::Consume {
                        queue: self.queue.name.to_string(),
                        cause: e.to_string(),
                    })?;
                Ok(message.map(|m| Delivery::from_amqp(m.delivery)))
            }
            Source::Memory(broker) => Ok(broker
                .try_take(self.queue.name)
                .map(|(tag, message)| Delivery::from_memory(broker.clone(), tag, message))),
        }
    }

    /// Decodes the identifier, runs the handler and settles the delivery.
    ///
    /// Payloads without this queue's identifier are logged and acknowledged;
    /// redelivering them would never help.
    pub async fn dispatch<H>(&self, handler: &H, delivery: Delivery) -> Result<(), BrokerError>
    where
        H: MessageHandler + ?Sized,
    {
        let completion = match decode_payload(self.queue.routing_key, delivery.body()) {
            Ok(id) => {
                if delivery.redelivered() {
                    debug!(queue = self.queue.name, %id, "Processing redelivered message");
                }
                handler.handle(&id).await
            }
            Err(e) => {
                error!(queue = self.queue.name, error = %e, "Dropping unprocessable message");
                Completion::Ack
            }
        };
        delivery.settle(completion).await
    }

    /// Processes deliveries until the broker closes the stream.
    pub async fn run<H>(&mut self, handler: &H) -> Result<(), BrokerError>
    where
        H: MessageHandler + ?Sized,
    {
        info!(queue = self.queue.name, "Starting consumer loop");
        while let Some(delivery) = self.next_delivery().await? {
            self.dispatch(handler, delivery).await?;
        }
        info!(queue = self.queue.name, "Consumer loop ended");
        Ok(())
    }

    /// Processes deliveries until the queue is momentarily empty. Returns how
    /// many were handled.
    ///
    /// A handler that keeps requeueing the same message is retried at most
    /// `max_deliveries` times in total before this returns.
    pub async fn drain<H>(&mut self, handler: &H, max_deliveries: usize) -> Result<usize, BrokerError>
    where
        H: MessageHandler + ?Sized,
    {
        let mut handled = 0;
        while handled < max_deliveries {
            let Some(delivery) = self.try_next_delivery().await? else {
                break;
            };
            self.dispatch(handler, delivery).await?;
            handled += 1;
        }
        Ok(handled)
    }

    pub async fn close(self) -> Result<(), BrokerError> {
        if let Source::Amqp {
            connection,
            channel,
            ..
        } = self.source
        {
            if let Err(e) = channel.close(200, "OK").await {
                warn!(error = %e, "Failed to close consumer channel");
            }
            connection
                .close(200, "OK")
                .await
                .map_err(|e| BrokerError::Connection {
                    broker: "consumer".to_string(),
                    cause: format!("close failed: {e}"),
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue.name)
            .finish()
    }
}
