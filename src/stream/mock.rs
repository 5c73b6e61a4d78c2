//! In-memory event source and publisher for testing without a broker.

use super::{EventPublisher, EventSource, EventStream, PublishError, StreamError};
use crate::domain::Auction;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

type Item = Result<Auction, StreamError>;

#[derive(Debug)]
struct TopicChannel {
    tx: mpsc::UnboundedSender<Item>,
    rx: Option<mpsc::UnboundedReceiver<Item>>,
}

impl TopicChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Channel-backed topics; each topic can be subscribed once.
#[derive(Debug, Default)]
pub struct MockEventSource {
    topics: Mutex<HashMap<String, TopicChannel>>,
}

/// Producer handle for one mock topic.
#[derive(Debug, Clone)]
pub struct MockTopic {
    tx: mpsc::UnboundedSender<Item>,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicChannel>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Producer for `name`, creating the topic if needed.
    pub fn topic(&self, name: &str) -> MockTopic {
        let mut topics = self.lock();
        let channel = topics
            .entry(name.to_string())
            .or_insert_with(TopicChannel::new);
        MockTopic {
            tx: channel.tx.clone(),
        }
    }
}

impl MockTopic {
    pub fn send(&self, auction: Auction) -> bool {
        self.tx.send(Ok(auction)).is_ok()
    }

    pub fn send_error(&self, error: StreamError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn subscribe(&self, topic: &str) -> Result<EventStream, StreamError> {
        let rx = self
            .lock()
            .entry(topic.to_string())
            .or_insert_with(TopicChannel::new)
            .rx
            .take()
            .ok_or_else(|| StreamError::Closed(format!("{} already subscribed", topic)))?;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

/// Publisher that keeps every record in memory, optionally failing every call.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<PublishedRecord>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Other("publisher configured to fail".to_string()));
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedRecord {
                topic: topic.to_string(),
                key: key.to_string(),
                value,
            });
        Ok(())
    }
}
