// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-in for the AMQP broker

use logfetcher::broker::{Broker, Subscription};
use logfetcher::errors::BrokerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Queues {
    senders: HashMap<String, mpsc::UnboundedSender<Vec<u8>>>,
    closed: Vec<String>,
}

/// Broker whose queues are unbounded channels; cloning shares the queues.
#[derive(Clone, Default)]
pub struct MockBroker {
    queues: Arc<Mutex<Queues>>,
}

impl MockBroker {
    pub fn publish(&self, queue: &str, body: &str) -> bool {
        self.queues
            .lock()
            .unwrap()
            .senders
            .get(queue)
            .is_some_and(|tx| tx.send(body.as_bytes().to_vec()).is_ok())
    }

    pub fn is_subscribed(&self, queue: &str) -> bool {
        self.queues.lock().unwrap().senders.contains_key(queue)
    }

    #[allow(dead_code)]
    pub fn closed(&self) -> Vec<String> {
        let mut closed = self.queues.lock().unwrap().closed.clone();
        closed.sort();
        closed
    }

    /// Waits up to ~2s for a consumer to attach to `queue`.
    pub async fn wait_for_subscriber(&self, queue: &str) {
        for _ in 0..200 {
            if self.is_subscribed(queue) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no consumer subscribed to {queue}");
    }
}

struct MockSubscription {
    queue: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    queues: Arc<Mutex<Queues>>,
}

#[async_trait::async_trait]
impl Subscription for MockSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Vec<u8>, BrokerError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock().unwrap();
        queues.senders.remove(&self.queue);
        queues.closed.push(self.queue.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Broker for MockBroker {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues
            .lock()
            .unwrap()
            .senders
            .insert(queue.to_string(), tx);
        Ok(Box::new(MockSubscription {
            queue: queue.to_string(),
            rx,
            queues: Arc::clone(&self.queues),
        }))
    }
}
