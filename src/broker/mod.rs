//! Message broker plumbing: topology, payloads, connections, publishers and
//! consumers.
//!
//! The pipeline uses one direct exchange and two durable queues:
//! - **gather** (`harvest.gather`): payload `{"harvest_job_id": "<id>"}`
//! - **fetch** (`harvest.fetch`): payload `{"harvest_object_id": "<id>"}`

pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod memory;
pub mod publisher;

use serde_json::{Map, Value};
use thiserror::Error;

pub use connection::{BrokerConnection, ConnectionFactory};
pub use consumer::{Consumer, Delivery, MessageHandler};
pub use memory::MemoryBroker;
pub use publisher::Publisher;

pub const EXCHANGE_NAME: &str = "harvest";

pub const JOB_ID_KEY: &str = "harvest_job_id";
pub const OBJECT_ID_KEY: &str = "harvest_object_id";

/// A queue and the routing key binding it to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: &'static str,
    pub routing_key: &'static str,
}

pub const GATHER_QUEUE: QueueSpec = QueueSpec {
    name: "harvest.gather",
    routing_key: JOB_ID_KEY,
};

pub const FETCH_QUEUE: QueueSpec = QueueSpec {
    name: "harvest.fetch",
    routing_key: OBJECT_ID_KEY,
};

/// What to do with a delivery once its handler has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Remove the message from the queue
    Ack,
    /// Hand the message back to the broker for redelivery
    Requeue,
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection to broker {broker} failed: {cause}")]
    Connection { broker: String, cause: String },

    #[error("Failed to declare {queue}: {cause}")]
    Declare { queue: String, cause: String },

    #[error("Failed to publish with routing key {routing_key}: {cause}")]
    Publish { routing_key: String, cause: String },

    #[error("Failed to consume from {queue}: {cause}")]
    Consume { queue: String, cause: String },

    #[error("Failed to settle delivery: {0}")]
    Settle(String),

    /// The message body is not a payload this queue understands
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// Encodes `{key: id}` as a JSON object.
pub fn encode_payload(key: &str, id: &str) -> Result<Vec<u8>, BrokerError> {
    let mut body = Map::new();
    body.insert(key.to_string(), Value::String(id.to_string()));
    serde_json::to_vec(&Value::Object(body))
        .map_err(|e| BrokerError::Protocol(format!("encode payload: {e}")))
}

/// Extracts the identifier stored under `key` from a JSON object payload.
pub fn decode_payload(key: &str, body: &[u8]) -> Result<String, BrokerError> {
    let payload: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|e| BrokerError::Protocol(format!("payload is not a JSON object: {e}")))?;

    match payload.get(key) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(other) => Err(BrokerError::Protocol(format!(
            "{key} must be a non-empty string, got {other}"
        ))),
        None => Err(BrokerError::Protocol(format!("no {key} received"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let body = encode_payload(JOB_ID_KEY, "job-1").unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, serde_json::json!({"harvest_job_id": "job-1"}));
        assert_eq!(decode_payload(JOB_ID_KEY, &body).unwrap(), "job-1");
    }

    #[test]
    fn test_decode_rejects_wrong_key() {
        let body = encode_payload(JOB_ID_KEY, "job-1").unwrap();
        let err = decode_payload(OBJECT_ID_KEY, &body).unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        for body in [
            &b"not json"[..],
            br#"["harvest_object_id"]"#,
            br#"{"harvest_object_id": 42}"#,
            br#"{"harvest_object_id": "  "}"#,
        ] {
            assert!(decode_payload(OBJECT_ID_KEY, body).is_err());
        }
    }

    #[test]
    fn test_topology_routing_keys() {
        assert_eq!(GATHER_QUEUE.routing_key, JOB_ID_KEY);
        assert_eq!(FETCH_QUEUE.routing_key, OBJECT_ID_KEY);
        assert_ne!(GATHER_QUEUE.name, FETCH_QUEUE.name);
    }
}
