//! Runs the long-lived tasks as one group that fails together.

use crate::stream::StreamError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("task {task} failed: {source}")]
    Stream {
        task: String,
        #[source]
        source: StreamError,
    },
    #[error("subscribing to {topic} failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: StreamError,
    },
    #[error("task {task} exited")]
    Exited { task: String },
    #[error("task {task} panicked: {message}")]
    Panicked { task: String, message: String },
    #[error("join error: {0}")]
    Join(String),
    #[error("no tasks to supervise")]
    Empty,
}

type TaskResult = (String, Result<(), SupervisorError>);

/// A group of tasks sharing one cancellation token.
///
/// The first task to finish, for any reason, ends the whole group.
pub struct Supervisor {
    cancel: CancellationToken,
    tasks: JoinSet<TaskResult>,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<(), SupervisorError>> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(task = %name, "Spawning supervised task");
        self.tasks.spawn(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(SupervisorError::Panicked {
                    task: name.clone(),
                    message: panic_message(panic),
                }),
            };
            (name, result)
        });
    }

    /// Wait for the first task to exit, stop the rest and report why the group ended.
    ///
    /// Always returns an error: a clean exit of a task that should run forever
    /// is reported as [`SupervisorError::Exited`].
    pub async fn run(mut self) -> SupervisorError {
        let Some(first) = self.tasks.join_next().await else {
            return SupervisorError::Empty;
        };

        let error = match first {
            Ok((task, Ok(()))) => SupervisorError::Exited { task },
            Ok((_, Err(e))) => e,
            Err(e) => SupervisorError::Join(e.to_string()),
        };
        tracing::error!("Supervised group stopping: {}", error);

        self.cancel.cancel();
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok((task, Ok(()))) => tracing::info!(task = %task, "Task stopped"),
                    Ok((task, Err(e))) => tracing::warn!(task = %task, "Task stopped: {}", e),
                    Err(e) => tracing::warn!("Task join failed: {}", e),
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Shutdown grace elapsed, aborting {} tasks", self.tasks.len());
            self.tasks.abort_all();
        }

        error
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_group() {
        let supervisor = Supervisor::new(CancellationToken::new());
        assert!(matches!(supervisor.run().await, SupervisorError::Empty));
    }

    #[tokio::test]
    async fn test_first_failure_cancels_others() {
        let cancel = CancellationToken::new();
        let mut supervisor = Supervisor::new(cancel.clone());
        let observed = cancel.clone();
        supervisor.spawn("waiter", async move {
            observed.cancelled().await;
            Ok(())
        });
        supervisor.spawn("failing", async {
            Err(SupervisorError::Stream {
                task: "failing".to_string(),
                source: StreamError::Closed("end of stream".to_string()),
            })
        });
        assert_eq!(supervisor.len(), 2);

        let err = supervisor.run().await;
        assert!(matches!(err, SupervisorError::Stream { ref task, .. } if task == "failing"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_token_follows_the_group() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        let shutdown = supervisor.cancel_token();
        supervisor.spawn("short-lived", async { Ok(()) });
        assert!(!shutdown.is_cancelled());
        supervisor.run().await;
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_clean_exit_is_an_error() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        supervisor.spawn("short-lived", async { Ok(()) });
        let err = supervisor.run().await;
        assert!(matches!(err, SupervisorError::Exited { ref task } if task == "short-lived"));
    }

    #[tokio::test]
    async fn test_panic_is_named() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        supervisor.spawn("boom", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        match supervisor.run().await {
            SupervisorError::Panicked { task, message } => {
                assert_eq!(task, "boom");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stuck_task_is_aborted_after_grace() {
        let mut supervisor =
            Supervisor::new(CancellationToken::new()).with_shutdown_grace(Duration::from_millis(50));
        supervisor.spawn("stuck", std::future::pending::<Result<(), SupervisorError>>());
        supervisor.spawn("done", async { Ok(()) });
        let err = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
            .await
            .expect("supervisor did not return");
        assert!(matches!(err, SupervisorError::Exited { .. }));
    }
}
