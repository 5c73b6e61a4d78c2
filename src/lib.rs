pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestration;
pub mod stream;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Auction, Bid, Challenge, ConnectionRequest, Identity, Link, LinkId, NewChallenge, User,
    UserId, VerificationEvent,
};
pub use engine::{AmountMatcher, CodeGenerator, PendingStore};
pub use error::AppError;
pub use metrics::{CounterMetrics, MetricEvent, Metrics, NoopMetrics};
pub use orchestration::{
    start_verification, ChallengeTracker, ConnectError, ConnectService, EvictionLoop,
    StreamMatcher, Supervisor, SupervisorError, Topics,
};
pub use stream::{EventPublisher, EventSource, MockEventSource, RecordingPublisher, RestProxyClient};
