//! Kafka REST Proxy (v2 API) client for consuming and producing JSON records.

use super::{EventPublisher, EventSource, EventStream, PublishError, StreamError};
use crate::domain::Auction;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

const CONTENT_V2: &str = "application/vnd.kafka.v2+json";
const CONTENT_JSON_V2: &str = "application/vnd.kafka.json.v2+json";

/// Talks to a REST proxy in front of the broker.
///
/// Consumers join `consumer_group`, so a restarted process resumes from the
/// group's committed offsets instead of replaying the topic.
#[derive(Debug, Clone)]
pub struct RestProxyClient {
    client: Client,
    base_url: String,
    consumer_group: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ConsumerInstance {
    base_uri: String,
}

#[derive(Debug, Deserialize)]
struct ConsumerRecord {
    value: serde_json::Value,
    #[serde(default)]
    offset: Option<i64>,
}

impl RestProxyClient {
    pub fn new(base_url: String, consumer_group: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            consumer_group,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Send a request, retrying connection failures, 429 and 5xx responses.
    async fn execute<F>(&self, build: F) -> Result<Response, StreamError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = build().send().await.map_err(|e| {
                backoff::Error::transient(StreamError::Network(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(StreamError::Http {
                    status: status.as_u16(),
                    message: "Server busy".to_string(),
                }));
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(StreamError::Http {
                    status: status.as_u16(),
                    message,
                }));
            }
            Ok(response)
        })
        .await
    }

    async fn create_consumer(&self, topic: &str) -> Result<ConsumerInstance, StreamError> {
        let url = format!("{}/consumers/{}", self.base_url, self.consumer_group);
        let name = format!("{}-{}", topic, uuid::Uuid::new_v4());
        let body = serde_json::json!({
            "name": name,
            "format": "json",
            "auto.offset.reset": "earliest",
        });

        let response = self
            .execute(|| {
                self.client
                    .post(&url)
                    .header("Content-Type", CONTENT_V2)
                    .json(&body)
            })
            .await?;

        response
            .json::<ConsumerInstance>()
            .await
            .map_err(|e| StreamError::Decode(format!("consumer instance: {}", e)))
    }

    async fn subscribe_instance(&self, base_uri: &str, topic: &str) -> Result<(), StreamError> {
        let url = format!("{}/subscription", base_uri);
        let body = serde_json::json!({ "topics": [topic] });
        self.execute(|| {
            self.client
                .post(&url)
                .header("Content-Type", CONTENT_V2)
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn fetch_records(
        &self,
        base_uri: &str,
    ) -> Result<Vec<Result<Auction, StreamError>>, StreamError> {
        let url = format!("{}/records", base_uri);
        let response = self
            .execute(|| self.client.get(&url).header("Accept", CONTENT_JSON_V2))
            .await?;

        let records = response
            .json::<Vec<ConsumerRecord>>()
            .await
            .map_err(|e| StreamError::Closed(format!("unreadable records batch: {}", e)))?;

        Ok(records.into_iter().map(decode_record).collect())
    }
}

fn decode_record(record: ConsumerRecord) -> Result<Auction, StreamError> {
    serde_json::from_value::<Auction>(record.value).map_err(|e| {
        StreamError::Decode(format!("record at offset {:?}: {}", record.offset, e))
    })
}

struct ConsumerState {
    client: RestProxyClient,
    base_uri: String,
    buffer: VecDeque<Result<Auction, StreamError>>,
    failed: bool,
}

#[async_trait]
impl EventSource for RestProxyClient {
    async fn subscribe(&self, topic: &str) -> Result<EventStream, StreamError> {
        let instance = self.create_consumer(topic).await?;
        self.subscribe_instance(&instance.base_uri, topic).await?;
        info!(
            "Subscribed to {} as group {} ({})",
            topic, self.consumer_group, instance.base_uri
        );

        let state = ConsumerState {
            client: self.clone(),
            base_uri: instance.base_uri,
            buffer: VecDeque::new(),
            failed: false,
        };

        Ok(futures::stream::unfold(state, |mut state| async move {
            // A fatal error is yielded once, then the stream ends.
            if state.failed {
                return None;
            }
            loop {
                if let Some(item) = state.buffer.pop_front() {
                    return Some((item, state));
                }
                match state.client.fetch_records(&state.base_uri).await {
                    Ok(batch) if batch.is_empty() => {
                        tokio::time::sleep(state.client.poll_interval).await;
                    }
                    Ok(batch) => {
                        debug!("Fetched {} records", batch.len());
                        state.buffer.extend(batch);
                    }
                    Err(e) => {
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed())
    }
}

impl From<StreamError> for PublishError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Network(msg) => PublishError::Network(msg),
            StreamError::Http { status, message } => PublishError::Http { status, message },
            other => PublishError::Other(other.to_string()),
        }
    }
}

#[async_trait]
impl EventPublisher for RestProxyClient {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError> {
        let url = format!("{}/topics/{}", self.base_url, topic);
        let body = serde_json::json!({
            "records": [{ "key": key, "value": value }]
        });

        self.execute(|| {
            self.client
                .post(&url)
                .header("Content-Type", CONTENT_JSON_V2)
                .json(&body)
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            RestProxyClient::new("http://proxy:8082/".to_string(), "mc-connect1".to_string());
        assert_eq!(client.base_url, "http://proxy:8082");
        assert_eq!(client.consumer_group(), "mc-connect1");
    }

    #[test]
    fn test_decode_record_valid() {
        let record: ConsumerRecord = serde_json::from_value(serde_json::json!({
            "topic": "sky-new-auction",
            "key": null,
            "value": {"uuid": "lot", "auctioneerId": "abc", "startingBid": 855},
            "partition": 0,
            "offset": 12
        }))
        .unwrap();
        let auction = decode_record(record).unwrap();
        assert_eq!(auction.seller(), Some("abc"));
        assert_eq!(auction.starting_bid, 855);
    }

    #[test]
    fn test_decode_record_invalid_is_not_fatal() {
        let record = ConsumerRecord {
            value: serde_json::json!({"startingBid": "not a number"}),
            offset: Some(3),
        };
        let err = decode_record(record).unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_stream_error_maps_to_publish_error() {
        let err: PublishError = StreamError::Http {
            status: 422,
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, PublishError::Http { status: 422, .. }));
    }
}
