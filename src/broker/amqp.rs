//! AMQP 0.9.1 transport via `lapin`.

use super::{BrokerError, QueueSpec, EXCHANGE_NAME};
use crate::config::BrokerConfig;
use lapin::options::{
    BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, instrument};

/// Builds the broker URI from discrete settings so credentials and vhost
/// never pass through string formatting.
pub fn amqp_uri(config: &BrokerConfig) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.authority.host = config.hostname.clone();
    uri.authority.port = config.port;
    uri.authority.userinfo.username = config.user_id.clone();
    uri.authority.userinfo.password = config.password.clone();
    uri.vhost = config.virtual_host.clone();
    uri
}

#[instrument(skip(config), fields(broker = %config.redacted()))]
pub async fn connect(config: &BrokerConfig) -> Result<Connection, BrokerError> {
    Connection::connect_uri(
        amqp_uri(config),
        ConnectionProperties::default().with_connection_name("harvest-queue".into()),
    )
    .await
    .map_err(|e| BrokerError::Connection {
        broker: config.redacted(),
        cause: e.to_string(),
    })
}

async fn open_channel(connection: &Connection, queue: QueueSpec) -> Result<Channel, BrokerError> {
    connection
        .create_channel()
        .await
        .map_err(|e| BrokerError::Declare {
            queue: queue.name.to_string(),
            cause: format!("channel creation failed: {e}"),
        })
}

/// Declares the exchange and the durable queue bound to its routing key.
async fn declare_topology(channel: &Channel, queue: QueueSpec) -> Result<(), BrokerError> {
    let declare_err = |e: lapin::Error| BrokerError::Declare {
        queue: queue.name.to_string(),
        cause: e.to_string(),
    };

    channel
        .exchange_declare(
            EXCHANGE_NAME,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(declare_err)?;

    channel
        .queue_declare(
            queue.name,
            QueueDeclareOptions {
                durable: true,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(declare_err)?;

    channel
        .queue_bind(
            queue.name,
            EXCHANGE_NAME,
            queue.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(declare_err)?;

    debug!(queue = queue.name, routing_key = queue.routing_key, "Declared queue");
    Ok(())
}

/// Channel with publisher confirms enabled.
pub async fn publisher_channel(
    connection: &Connection,
    queue: QueueSpec,
) -> Result<Channel, BrokerError> {
    let channel = open_channel(connection, queue).await?;
    declare_topology(&channel, queue).await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| BrokerError::Declare {
            queue: queue.name.to_string(),
            cause: format!("confirm select failed: {e}"),
        })?;
    Ok(channel)
}

/// Channel that takes one unacknowledged delivery at a time.
pub async fn consumer_channel(
    connection: &Connection,
    queue: QueueSpec,
) -> Result<Channel, BrokerError> {
    let channel = open_channel(connection, queue).await?;
    declare_topology(&channel, queue).await?;
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| BrokerError::Declare {
            queue: queue.name.to_string(),
            cause: format!("failed to set QoS: {e}"),
        })?;
    Ok(channel)
}
