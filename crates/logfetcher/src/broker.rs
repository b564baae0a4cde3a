// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Broker seam used by consumers, with the AMQP implementation.
//!
//! Each subscription owns its own connection and channel so that one
//! device's broker failure never affects another device's consumer.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::BasicConsumeOptions;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, warn};

use crate::errors::BrokerError;

const REPLY_SUCCESS: u16 = 200;

/// An open consumption of one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery body; `None` once the broker has closed the stream.
    async fn next_delivery(&mut self) -> Option<Result<Vec<u8>, BrokerError>>;

    /// Releases the channel and connection behind the subscription.
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// AMQP 0-9-1 broker reached through a `amqp://` URL.
#[derive(Clone)]
pub struct AmqpBroker {
    url: String,
}

impl AmqpBroker {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl std::fmt::Debug for AmqpBroker {
    // the URL usually embeds credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBroker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(e.into());
            }
        };

        // auto-ack: deliveries are acknowledged on receipt (at-most-once)
        let options = BasicConsumeOptions {
            no_ack: true,
            exclusive: false,
            ..BasicConsumeOptions::default()
        };
        let consumer = match channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                let _ = channel.close(REPLY_SUCCESS, "consume failed").await;
                let _ = connection.close(REPLY_SUCCESS, "consume failed").await;
                return Err(e.into());
            }
        };
        debug!("Subscribed to queue {queue}");

        Ok(Box::new(AmqpSubscription {
            queue: queue.to_string(),
            connection,
            channel,
            consumer,
        }))
    }
}

struct AmqpSubscription {
    queue: String,
    connection: Connection,
    channel: Channel,
    consumer: lapin::Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Vec<u8>, BrokerError>> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(delivery.data)),
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "consumer stopped").await {
            // an already-closed channel still leaves the connection to release
            warn!("Failed to close channel for {}: {e}", self.queue);
        }
        self.connection
            .close(REPLY_SUCCESS, "consumer stopped")
            .await?;
        Ok(())
    }
}
