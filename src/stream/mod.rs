//! Event stream abstraction for consuming auction records and publishing events.

use crate::domain::Auction;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod rest_proxy;

pub use mock::{MockEventSource, MockTopic, PublishedRecord, RecordingPublisher};
pub use rest_proxy::RestProxyClient;

/// Items of a subscribed topic. The stream ending is itself a failure.
pub type EventStream = BoxStream<'static, Result<Auction, StreamError>>;

/// Source of auction records for a topic.
///
/// Implementations resume from the consumer group's committed position.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    async fn subscribe(&self, topic: &str) -> Result<EventStream, StreamError>;
}

/// Sink for outbound events.
#[async_trait]
pub trait EventPublisher: Send + Sync + fmt::Debug {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    /// A single record could not be decoded; the stream itself is intact.
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stream closed: {0}")]
    Closed(String),
}

impl StreamError {
    /// Whether the consumer has to stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::Decode(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}
