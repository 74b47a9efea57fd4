//! RabbitMQ adapter built on `lapin`.
//!
//! Messages go through the default exchange with the queue name as routing
//! key. Channels run in publisher-confirm mode so `publish_persistent` only
//! resolves after the broker has taken responsibility for the message.

use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::debug;

use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::port::{BrokerClient, BrokerSession, Delivery, DeliveryStream};

/// AMQP `delivery_mode` for messages written to disk by the broker.
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const REPLY_SUCCESS: u16 = 200;
const CONTENT_TYPE_JSON: &str = "application/json";
const DEFAULT_VHOST: &str = "/";

pub struct AmqpClient {
    uri: AMQPUri,
    connection_name: String,
    connect_timeout: Duration,
}

impl AmqpClient {
    #[must_use]
    pub fn new(settings: &BrokerSettings, connection_name: &str) -> Self {
        Self {
            uri: amqp_uri(settings),
            connection_name: connection_name.to_string(),
            connect_timeout: settings.connect_timeout,
        }
    }

    /// Same broker, different bound on the connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Broker address on the default virtual host. Built field by field so that
/// credentials are never reparsed as URI syntax.
fn amqp_uri(settings: &BrokerSettings) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: settings.user.clone(),
                password: settings.password.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: DEFAULT_VHOST.to_string(),
        ..AMQPUri::default()
    }
}

/// Message properties for every published record.
fn persistent_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_content_type(CONTENT_TYPE_JSON.into())
}

impl BrokerClient for AmqpClient {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, BrokerError>> {
        Box::pin(async move {
            let properties = ConnectionProperties::default()
                .with_connection_name(self.connection_name.clone().into());

            let connection = tokio::time::timeout(
                self.connect_timeout,
                Connection::connect_uri(self.uri.clone(), properties),
            )
            .await
            .map_err(|_| BrokerError::Timeout(self.connect_timeout))?
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

            let channel = connection
                .create_channel()
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()))?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()))?;

            debug!(channel_id = channel.id(), "AMQP channel opened");
            Ok(Box::new(AmqpSession {
                connection,
                channel,
            }) as Box<dyn BrokerSession>)
        })
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

impl BrokerSession for AmqpSession {
    fn declare_durable_queue<'a>(
        &'a self,
        queue: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            };
            self.channel
                .queue_declare(queue, options, FieldTable::default())
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::Declare {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn publish_persistent<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let confirm = self
                .channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    persistent_properties(),
                )
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))?;

            match confirm
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))?
            {
                Confirmation::Nack(_) => Err(BrokerError::NotConfirmed),
                Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            }
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        prefetch: u16,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>> {
        Box::pin(async move {
            self.channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::Consume(e.to_string()))?;

            // no_ack = false: every delivery waits for an explicit ack or nack
            let consumer = self
                .channel
                .basic_consume(
                    queue,
                    "",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Consume(e.to_string()))?;

            Ok(Box::new(AmqpDeliveryStream { consumer }) as Box<dyn DeliveryStream>)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| BrokerError::Close(e.to_string()))
        })
    }
}

struct AmqpDeliveryStream {
    consumer: Consumer,
}

impl DeliveryStream for AmqpDeliveryStream {
    fn next_delivery(
        &mut self,
    ) -> BoxFuture<'_, Option<Result<Box<dyn Delivery>, BrokerError>>> {
        Box::pin(async move {
            let next = self.consumer.next().await?;
            Some(
                next.map(|delivery| Box::new(AmqpDelivery { delivery }) as Box<dyn Delivery>)
                    .map_err(|e| BrokerError::Consume(e.to_string())),
            )
        })
    }
}

struct AmqpDelivery {
    delivery: lapin::message::Delivery,
}

impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move {
            self.delivery
                .acker
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| BrokerError::Acknowledge(e.to_string()))
        })
    }

    fn nack_requeue(self: Box<Self>) -> BoxFuture<'static, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            };
            self.delivery
                .acker
                .nack(options)
                .await
                .map_err(|e| BrokerError::Acknowledge(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".into(),
            // Port 1 is reserved and never has an AMQP listener.
            port: 1,
            user: "guest".into(),
            password: "guest".into(),
            queue: "logs".into(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_uri_keeps_reserved_characters_in_credentials() {
        let mut settings = settings();
        settings.host = "rabbitmq".into();
        settings.port = 5672;
        settings.user = "svc:writer".into();
        settings.password = "p@ss/w:rd".into();

        let uri = amqp_uri(&settings);

        assert_eq!(uri.authority.host, "rabbitmq");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "svc:writer");
        assert_eq!(uri.authority.userinfo.password, "p@ss/w:rd");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn test_published_messages_are_persistent_json() {
        let properties = persistent_properties();

        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(
            properties.content_type().as_ref().map(|ct| ct.as_str()),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_without_panicking() {
        let client = AmqpClient::new(&settings(), "test")
            .with_connect_timeout(Duration::from_millis(500));

        let result = client.connect().await;

        assert!(matches!(
            result,
            Err(BrokerError::Connect(_) | BrokerError::Timeout(_))
        ));
    }
}
