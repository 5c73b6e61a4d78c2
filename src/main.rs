use chrono::Utc;
use mc_connect::orchestration::{start_verification, Topics};
use mc_connect::{
    api, config::Config, db::init_db, ChallengeTracker, CodeGenerator, ConnectService,
    CounterMetrics, EvictionLoop, PendingStore, Repository, RestProxyClient, StreamMatcher,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let metrics = Arc::new(CounterMetrics::new());
    let pending = Arc::new(PendingStore::new());
    let broker = Arc::new(
        RestProxyClient::new(config.kafka_rest_url.clone(), config.consumer_group.clone())
            .with_poll_interval(config.poll_interval),
    );

    let connect = Arc::new(ConnectService::new(
        repo.clone(),
        pending.clone(),
        CodeGenerator::new(config.token_secret.clone()),
        broker.clone(),
        config.topic_verified.clone(),
        metrics.clone(),
    ));
    let tracker = Arc::new(ChallengeTracker::new(
        repo.clone(),
        connect.clone(),
        metrics.clone(),
    ));

    // Restore caches
    if let Err(e) = connect.warm_up(Utc::now(), config.validity_window).await {
        eprintln!("Failed to warm pending cache: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = tracker.load().await {
        eprintln!("Failed to load challenges: {}", e);
        std::process::exit(1);
    }

    // Start stream consumers
    let cancel = CancellationToken::new();
    let eviction = EvictionLoop::new(
        pending,
        config.validity_window,
        config.sweep_interval,
        metrics.clone(),
    );
    let topics: Topics = config.topics();
    let supervisor = match start_verification(
        broker,
        StreamMatcher::new(connect.clone()),
        tracker.clone(),
        eviction,
        &topics,
        cancel.clone(),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start verification: {}", e);
            std::process::exit(1);
        }
    };
    // Create router
    let app = api::create_router(api::AppState::new(repo, connect, tracker, metrics));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    let shutdown = supervisor.cancel_token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });
    let mut supervised = tokio::spawn(supervisor.run());

    // Run until interrupted or until any verification task stops
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            cancel.cancel();
            let _ = supervised.await;
            let _ = server.await;
        }
        stopped = &mut supervised => {
            cancel.cancel();
            let _ = server.await;
            match stopped {
                Ok(e) => eprintln!("Verification stopped: {}", e),
                Err(e) => eprintln!("Supervisor task failed: {}", e),
            }
            std::process::exit(1);
        }
        served = &mut server => {
            cancel.cancel();
            let _ = supervised.await;
            match served {
                Ok(Ok(())) => eprintln!("Server stopped unexpectedly"),
                Ok(Err(e)) => eprintln!("Server error: {}", e),
                Err(e) => eprintln!("Server task failed: {}", e),
            }
            std::process::exit(1);
        }
    }
}
