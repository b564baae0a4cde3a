// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One broker subscription for one device.
//!
//! A [`Consumer`] moves through `Starting → Running → Draining → Stopped`.
//! While running it waits on whichever comes first, the next delivery or its
//! cancellation token; cancellation is checked first, so no message is
//! processed once cancellation has been observed.

use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{Broker, Subscription};
use crate::classifier::Classifier;
use crate::errors::{BrokerError, ConsumerError};
use crate::index_writer::{index_name, IndexWriter};
use crate::types::{RawMessage, SubscriptionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Collaborators shared by every consumer of the process.
#[derive(Clone)]
pub struct Pipeline {
    pub broker: Arc<dyn Broker>,
    pub writer: Arc<dyn IndexWriter>,
    pub classifier: Arc<Classifier>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

pub struct Consumer {
    key: SubscriptionKey,
    device_name: String,
    pipeline: Pipeline,
    cancel_token: CancellationToken,
    state: ConsumerState,
}

impl Consumer {
    #[must_use]
    pub fn new(
        key: SubscriptionKey,
        device_name: impl Into<String>,
        pipeline: Pipeline,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            key,
            device_name: device_name.into(),
            pipeline,
            cancel_token,
            state: ConsumerState::Starting,
        }
    }

    fn transition(&mut self, next: ConsumerState) {
        debug!(key = %self.key, "consumer {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs until cancelled (`Ok`) or until the broker side fails (`Err`).
    pub async fn run(mut self) -> Result<(), ConsumerError> {
        let queue = self.key.queue_name();
        if self.cancel_token.is_cancelled() {
            self.transition(ConsumerState::Stopped);
            return Ok(());
        }

        let mut subscription = match self.pipeline.broker.subscribe(&queue).await {
            Ok(subscription) => subscription,
            Err(source) => {
                self.transition(ConsumerState::Stopped);
                return Err(ConsumerError::Broker { queue, source });
            }
        };
        self.transition(ConsumerState::Running);
        info!("Started consumer for {queue}");

        let outcome = self.consume(subscription.as_mut(), &queue).await;

        self.transition(ConsumerState::Draining);
        if let Err(e) = subscription.close().await {
            warn!("Failed to close subscription for {queue}: {e}");
        }
        self.transition(ConsumerState::Stopped);
        info!("Stopped consumer for {queue}");

        outcome.map_err(|source| ConsumerError::Broker { queue, source })
    }

    async fn consume(
        &self,
        subscription: &mut dyn Subscription,
        queue: &str,
    ) -> Result<(), BrokerError> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("Consumer for {queue} cancelled");
                    return Ok(());
                }
                delivery = subscription.next_delivery() => match delivery {
                    Some(Ok(body)) => self.handle(&body).await,
                    Some(Err(e)) => return Err(e),
                    None => return Err(BrokerError::Closed(queue.to_string())),
                },
            }
        }
    }

    /// Classify, filter and index one delivery. Failures stay local to it.
    async fn handle(&self, body: &[u8]) {
        let raw = RawMessage::from_body(body);
        let mut record = self.pipeline.classifier.classify(&raw);
        record.nas_name.clone_from(&self.device_name);

        if !record.is_indexable() {
            trace!(
                "Dropping {} message without URL from {}",
                record.brand,
                self.key
            );
            return;
        }

        let index = index_name(&self.key, Local::now().date_naive());
        if let Err(e) = self.pipeline.writer.write(&record, &index).await {
            error!("Failed to index {} message into {index}: {e}", record.brand);
        }
    }
}
