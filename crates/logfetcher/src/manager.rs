// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps exactly one running [`Consumer`] per device listed in the directory.
//!
//! Each cycle fetches the device set, then under one lock cancels the handles
//! of devices that disappeared and spawns consumers for devices that appeared.
//! Devices present on both sides are left alone. The handle map lock is never
//! held across a network call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::{Consumer, Pipeline};
use crate::directory::DeviceDirectory;
use crate::errors::ApiError;
use crate::types::{Device, SubscriptionKey};

struct ConsumerHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

/// Keys added and removed by one reconciliation cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<SubscriptionKey>,
    pub stopped: Vec<SubscriptionKey>,
}

pub struct Manager {
    directory: Arc<dyn DeviceDirectory>,
    pipeline: Pipeline,
    handles: Mutex<HashMap<SubscriptionKey, ConsumerHandle>>,
    poll_interval: Duration,
}

impl Manager {
    #[must_use]
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        pipeline: Pipeline,
        poll_interval: Duration,
    ) -> Self {
        Self {
            directory,
            pipeline,
            handles: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    /// Polls and reconciles until `cancel_token` fires, then shuts every
    /// consumer down. Cycles never overlap.
    pub async fn run(&self, cancel_token: CancellationToken) {
        info!(
            "Starting device reconciliation every {}s",
            self.poll_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!("Failed to refresh device directory, keeping current consumers: {e}");
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// One fetch-diff-apply cycle. On fetch failure the handle map is untouched.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, ApiError> {
        let devices = self.directory.fetch_devices().await?;
        let desired = desired_set(devices);

        let mut report = ReconcileReport::default();
        let mut handles = self.handles.lock().await;

        let removed: Vec<SubscriptionKey> = handles
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if let Some(handle) = handles.remove(&key) {
                handle.cancel_token.cancel();
                info!("Stopping consumer for removed device {key}");
                report.stopped.push(key);
            }
        }

        for (key, device) in desired {
            match handles.get(&key) {
                Some(handle) => {
                    if handle.task.is_finished() {
                        // exited on its own; left in place until the device is removed
                        warn!("Consumer for {key} is no longer running but its device is still listed");
                    }
                }
                None => {
                    let handle = self.spawn(key.clone(), &device);
                    handles.insert(key.clone(), handle);
                    info!("Started consumer for new device {key}");
                    report.started.push(key);
                }
            }
        }

        debug!(
            "Reconciled devices: {} running, {} started, {} stopped",
            handles.len(),
            report.started.len(),
            report.stopped.len()
        );
        report.started.sort();
        report.stopped.sort();
        Ok(report)
    }

    fn spawn(&self, key: SubscriptionKey, device: &Device) -> ConsumerHandle {
        let cancel_token = CancellationToken::new();
        let consumer = Consumer::new(
            key.clone(),
            device.name.clone(),
            self.pipeline.clone(),
            cancel_token.clone(),
        );
        let task = tokio::spawn(async move {
            if let Err(e) = consumer.run().await {
                error!("Consumer for {key} exited: {e}");
            }
        });
        ConsumerHandle { cancel_token, task }
    }

    /// Cancels every consumer and waits for all of them to release their
    /// broker resources.
    pub async fn shutdown(&self) {
        let drained: Vec<(SubscriptionKey, ConsumerHandle)> =
            self.handles.lock().await.drain().collect();
        for (_, handle) in &drained {
            handle.cancel_token.cancel();
        }
        for (key, handle) in drained {
            if let Err(e) = handle.task.await {
                error!("Consumer task for {key} did not finish cleanly: {e}");
            }
        }
        info!("All consumers stopped");
    }

    /// Currently tracked keys, sorted.
    pub async fn running_keys(&self) -> Vec<SubscriptionKey> {
        let keys: BTreeSet<SubscriptionKey> = self.handles.lock().await.keys().cloned().collect();
        keys.into_iter().collect()
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Desired key set; a later device with an already-seen key replaces the earlier one.
fn desired_set(devices: Vec<Device>) -> HashMap<SubscriptionKey, Device> {
    let mut desired = HashMap::with_capacity(devices.len());
    for device in devices {
        let key = device.subscription_key();
        let id = device.id;
        if let Some(previous) = desired.insert(key.clone(), device) {
            warn!(
                "Device {id} replaces device {} under subscription key {key}",
                previous.id
            );
        }
    }
    desired
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::consumer::tests::{eventually, pipeline, ChannelBroker, RecordingWriter, RUIJIE};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tracing_test::traced_test;

    /// Hands out one scripted answer per fetch; repeats the last when drained.
    struct ScriptedDirectory {
        answers: std::sync::Mutex<VecDeque<Result<Vec<Device>, ApiError>>>,
    }

    impl ScriptedDirectory {
        fn new(answers: Vec<Result<Vec<Device>, ApiError>>) -> Self {
            Self {
                answers: std::sync::Mutex::new(answers.into()),
            }
        }
    }

    #[async_trait]
    impl DeviceDirectory for ScriptedDirectory {
        async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError> {
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                return answers.pop_front().unwrap();
            }
            match answers.front().unwrap() {
                Ok(devices) => Ok(devices.clone()),
                Err(_) => Err(ApiError::Unauthorized),
            }
        }
    }

    fn device(id: i64, brand: &str, name: &str) -> Device {
        Device {
            id,
            brand: brand.to_string(),
            name: name.to_string(),
            ..Device::default()
        }
    }

    fn keys(raw: &[&str]) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = raw
            .iter()
            .map(|k| {
                let (brand, name) = k.split_once('-').unwrap();
                SubscriptionKey::from_parts(brand, name)
            })
            .collect();
        keys.sort();
        keys
    }

    fn manager(
        answers: Vec<Result<Vec<Device>, ApiError>>,
        broker: &Arc<ChannelBroker>,
        writer: &Arc<RecordingWriter>,
    ) -> Manager {
        Manager::new(
            Arc::new(ScriptedDirectory::new(answers)),
            pipeline(broker, writer),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_converges_from_one_device_set_to_the_next() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let d1 = vec![device(1, "ruijie", "a"), device(2, "forti", "b")];
        let d2 = vec![device(2, "forti", "b"), device(3, "Ruijie", "C")];
        let manager = manager(vec![Ok(d1), Ok(d2)], &broker, &writer);

        let report = manager.reconcile_once().await.unwrap();
        assert_eq!(report.started, keys(&["forti-b", "ruijie-a"]));
        assert!(report.stopped.is_empty());
        assert_eq!(manager.running_keys().await, keys(&["forti-b", "ruijie-a"]));
        eventually(|| broker.is_subscribed("ruijie-a-queue")).await;

        let report = manager.reconcile_once().await.unwrap();
        assert_eq!(report.started, keys(&["ruijie-c"]));
        assert_eq!(report.stopped, keys(&["ruijie-a"]));
        assert_eq!(manager.running_keys().await, keys(&["forti-b", "ruijie-c"]));

        // the removed device's consumer released its subscription
        eventually(|| broker.closed().contains(&"ruijie-a-queue".to_string())).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_devices_are_not_restarted() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let mut changed = device(1, "ruijie", "a");
        changed.description = "moved to rack 4".to_string();
        let manager = manager(
            vec![Ok(vec![device(1, "ruijie", "a")]), Ok(vec![changed])],
            &broker,
            &writer,
        );

        manager.reconcile_once().await.unwrap();
        let report = manager.reconcile_once().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert!(broker.closed().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_consumers_untouched() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let manager = manager(
            vec![
                Ok(vec![device(1, "ruijie", "a"), device(2, "forti", "b")]),
                Err(ApiError::Status {
                    status: 502,
                    body: String::new(),
                }),
            ],
            &broker,
            &writer,
        );

        manager.reconcile_once().await.unwrap();
        let before = manager.running_keys().await;
        assert!(manager.reconcile_once().await.is_err());
        assert_eq!(manager.running_keys().await, before);
        assert!(broker.closed().is_empty());

        // consumers keep ingesting through the outage
        eventually(|| broker.is_subscribed("ruijie-a-queue")).await;
        broker.publish("ruijie-a-queue", RUIJIE);
        eventually(|| writer.count() == 1).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_keys_yield_one_handle() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let manager = manager(
            vec![Ok(vec![
                device(1, "Ruijie", "Branch1"),
                device(2, "ruijie", "branch1"),
            ])],
            &broker,
            &writer,
        );

        let report = manager.reconcile_once().await.unwrap();
        assert_eq!(report.started, keys(&["ruijie-branch1"]));
        assert!(logs_contain("Device 2 replaces device 1"));
        let report = manager.reconcile_once().await.unwrap();
        assert!(report.started.is_empty());
        assert_eq!(manager.running_keys().await.len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_exited_consumer_is_not_restarted() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let manager = manager(vec![Ok(vec![device(1, "ruijie", "a")])], &broker, &writer);

        manager.reconcile_once().await.unwrap();
        eventually(|| broker.is_subscribed("ruijie-a-queue")).await;
        broker.drop_queue("ruijie-a-queue");
        eventually(|| broker.closed().len() == 1).await;

        let report = manager.reconcile_once().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(manager.running_keys().await, keys(&["ruijie-a"]));
        assert!(!broker.is_subscribed("ruijie-a-queue"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_consumer() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let manager = manager(
            vec![Ok(vec![device(1, "ruijie", "a"), device(2, "forti", "b")])],
            &broker,
            &writer,
        );
        manager.reconcile_once().await.unwrap();
        eventually(|| {
            broker.is_subscribed("ruijie-a-queue") && broker.is_subscribed("forti-b-queue")
        })
        .await;

        manager.shutdown().await;
        assert!(manager.running_keys().await.is_empty());
        let mut closed = broker.closed();
        closed.sort();
        assert_eq!(closed, vec!["forti-b-queue".to_string(), "ruijie-a-queue".to_string()]);
    }

    #[tokio::test]
    async fn test_run_polls_until_cancelled() {
        let broker = Arc::new(ChannelBroker::default());
        let writer = Arc::new(RecordingWriter::default());
        let manager = Arc::new(manager(
            vec![
                Ok(vec![device(1, "ruijie", "a")]),
                Ok(vec![device(2, "forti", "b")]),
            ],
            &broker,
            &writer,
        ));
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let token = token.clone();
            async move { manager.run(token).await }
        });

        eventually(|| broker.is_subscribed("forti-b-queue")).await;

        token.cancel();
        task.await.unwrap();
        assert!(manager.running_keys().await.is_empty());
        assert!(broker.closed().contains(&"forti-b-queue".to_string()));
        assert_eq!(writer.count(), 0);
    }
}
