//! Connection factory.

use super::{
    amqp, BrokerError, Consumer, MemoryBroker, Publisher, QueueSpec, FETCH_QUEUE, GATHER_QUEUE,
};
use crate::config::{BrokerConfig, MqBackend};
use tracing::{debug, error};

/// A live broker connection, owned by exactly one publisher or consumer.
pub enum BrokerConnection {
    Amqp(lapin::Connection),
    Memory(MemoryBroker),
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amqp(_) => f.write_str("BrokerConnection::Amqp"),
            Self::Memory(_) => f.write_str("BrokerConnection::Memory"),
        }
    }
}

/// Opens one connection per publisher or consumer from an explicit config.
///
/// There is no pooling. With [`MqBackend::Memory`] every connection opened by
/// this factory (and its clones) talks to the same in-process exchange.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: BrokerConfig,
    memory: MemoryBroker,
}

impl ConnectionFactory {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            memory: MemoryBroker::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The in-process exchange used when the backend is `memory`.
    pub fn memory_broker(&self) -> &MemoryBroker {
        &self.memory
    }

    pub async fn connect(&self) -> Result<BrokerConnection, BrokerError> {
        debug!(library = ?self.config.library, "Opening broker connection");
        match self.config.library {
            MqBackend::Amqp => match amqp::connect(&self.config).await {
                Ok(connection) => Ok(BrokerConnection::Amqp(connection)),
                Err(e) => {
                    error!(
                        broker = %self.config.redacted(),
                        user = %self.config.user_id,
                        error = %e,
                        "Error connecting to the message broker"
                    );
                    Err(e)
                }
            },
            MqBackend::Memory => Ok(BrokerConnection::Memory(self.memory.clone())),
        }
    }

    pub async fn publisher(&self, queue: QueueSpec) -> Result<Publisher, BrokerError> {
        Publisher::open(self.connect().await?, queue).await
    }

    pub async fn consumer(&self, queue: QueueSpec) -> Result<Consumer, BrokerError> {
        Consumer::open(self.connect().await?, queue).await
    }

    pub async fn gather_publisher(&self) -> Result<Publisher, BrokerError> {
        self.publisher(GATHER_QUEUE).await
    }

    pub async fn fetch_publisher(&self) -> Result<Publisher, BrokerError> {
        self.publisher(FETCH_QUEUE).await
    }

    pub async fn gather_consumer(&self) -> Result<Consumer, BrokerError> {
        self.consumer(GATHER_QUEUE).await
    }

    pub async fn fetch_consumer(&self) -> Result<Consumer, BrokerError> {
        self.consumer(FETCH_QUEUE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_connections_share_exchange() {
        let factory = ConnectionFactory::new(BrokerConfig::memory());
        let publisher = factory.fetch_publisher().await.unwrap();
        let _consumer = factory.clone().fetch_consumer().await.unwrap();

        publisher.send("obj-1").await.unwrap();
        publisher.close().await.unwrap();

        assert_eq!(factory.memory_broker().queue_len(FETCH_QUEUE.name), 1);
    }

    #[tokio::test]
    async fn test_amqp_connection_failure_surfaces() {
        let factory = ConnectionFactory::new(BrokerConfig {
            hostname: "127.0.0.1".into(),
            port: 1,
            ..BrokerConfig::default()
        });
        let err = factory.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection { .. }));
        assert!(err.is_transient());
    }
}
