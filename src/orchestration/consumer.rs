//! Generic consume loop shared by every stream task.

use super::connect::ConnectError;
use super::supervisor::SupervisorError;
use crate::domain::Auction;
use crate::stream::{EventStream, StreamError};
use futures::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Feed every record of `stream` to `handler` until cancelled.
///
/// Undecodable records and handler failures are logged and skipped. The stream
/// ending or failing stops the consumer with an error.
pub async fn run_consumer<F, Fut>(
    name: &str,
    mut stream: EventStream,
    cancel: CancellationToken,
    mut handler: F,
) -> Result<(), SupervisorError>
where
    F: FnMut(Auction) -> Fut + Send,
    Fut: Future<Output = Result<(), ConnectError>> + Send,
{
    tracing::info!(consumer = %name, "Consumer started");

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(consumer = %name, "Consumer cancelled");
                return Ok(());
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(auction)) => {
                let uuid = auction.uuid.clone();
                if let Err(e) = handler(auction).await {
                    tracing::error!(consumer = %name, auction = %uuid, "Handling record failed: {}", e);
                }
            }
            Some(Err(e)) if !e.is_fatal() => {
                tracing::warn!(consumer = %name, "Skipping record: {}", e);
            }
            Some(Err(e)) => {
                return Err(SupervisorError::Stream {
                    task: name.to_string(),
                    source: e,
                });
            }
            None => {
                return Err(SupervisorError::Stream {
                    task: name.to_string(),
                    source: StreamError::Closed("end of stream".to_string()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn auction(uuid: &str) -> Auction {
        Auction {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_is_an_error() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let items = stream::iter(vec![
            Ok(auction("a")),
            Err(StreamError::Decode("bad".to_string())),
            Ok(auction("b")),
        ])
        .boxed();

        let result = run_consumer("sales", items, CancellationToken::new(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(SupervisorError::Stream { source: StreamError::Closed(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_the_consumer() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let items = stream::iter(vec![
            Ok(auction("a")),
            Ok(auction("b")),
            Err(StreamError::Network("reset".to_string())),
            Ok(auction("never")),
        ])
        .boxed();

        let result = run_consumer("bids", items, CancellationToken::new(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConnectError::NotFound("link".to_string()))
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(SupervisorError::Stream { source: StreamError::Network(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_cleanly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_consumer("sold", stream::pending().boxed(), cancel, |_| async {
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }
}
