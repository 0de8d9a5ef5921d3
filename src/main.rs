use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use inventory_notifier::{
    api::{AppState, run_api_server},
    clients::{
        health::HealthChecker,
        log::LogTopic,
        memory::InMemoryQueue,
        publisher::TopicPublisher,
        queue::QueueClient,
        redis::HeartbeatStore,
        sns::SnsTopicPublisher,
        sqs::SqsQueueClient,
    },
    config::{Config, PublisherBackend, QueueBackend},
    dispatcher::NotificationDispatcher,
    models::stats::WorkerStats,
    producer::NotificationProducer,
    utils::init_tracing,
    worker::{NotificationWorker, WorkerConfig},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    let worker_id = config.worker_id();
    info!(worker_id = %worker_id, "Configuration validated, starting notification worker");

    let queue: Arc<dyn QueueClient> = match config.queue_backend {
        QueueBackend::Sqs => Arc::new(SqsQueueClient::connect(&config).await?),
        QueueBackend::Memory => Arc::new(InMemoryQueue::from_config(&config)),
    };

    let publisher: Arc<dyn TopicPublisher> = match config.publisher_backend {
        PublisherBackend::Sns => Arc::new(SnsTopicPublisher::connect(&config).await?),
        PublisherBackend::Log => Arc::new(LogTopic::new()),
    };

    let heartbeats = match &config.redis_url {
        Some(url) => Some(HeartbeatStore::connect(url).await?),
        None => None,
    };

    let stats = Arc::new(WorkerStats::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&publisher),
        config.topic_name.clone(),
        config.retry_config(),
    ));
    let worker = NotificationWorker::new(
        Arc::clone(&queue),
        dispatcher,
        WorkerConfig::from_config(&config),
        Arc::clone(&stats),
    );

    let shutdown = CancellationToken::new();

    let stale_after = config.wait_time() * 3 + config.poll_interval();
    let state = Arc::new(AppState {
        worker_id: worker_id.clone(),
        queue: Arc::clone(&queue),
        producer: NotificationProducer::new(Arc::clone(&queue)),
        stats: Arc::clone(&stats),
        heartbeats: heartbeats.clone(),
        health_checker: HealthChecker::new(
            Arc::clone(&queue),
            heartbeats.clone(),
            Arc::clone(&stats),
            stale_after,
        ),
        publisher,
        topic_name: config.topic_name.clone(),
        notification_queue_name: config.notification_queue_name.clone(),
        dead_letter_queue_name: config.dead_letter_queue_name.clone(),
        shutdown: shutdown.clone(),
    });

    let api_shutdown = shutdown.clone();
    let server_port = config.server_port;
    let api = tokio::spawn(async move {
        if let Err(e) = run_api_server(state, server_port, api_shutdown).await {
            error!(error = %e, "Operational API server failed");
        }
    });

    let heartbeat = heartbeats.clone().map(|store| {
        tokio::spawn(publish_heartbeats(
            store,
            Arc::clone(&stats),
            worker_id.clone(),
            config.heartbeat_interval(),
            shutdown.clone(),
        ))
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, finishing current batch");
        signal_shutdown.cancel();
    });

    worker.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    if let Some(store) = &heartbeats {
        if let Err(e) = store.remove(&worker_id).await {
            warn!(error = %e, "Failed to remove worker heartbeat");
        }
    }
    let _ = api.await;

    info!("Notification worker shut down cleanly");

    Ok(())
}

async fn publish_heartbeats(
    store: HeartbeatStore,
    stats: Arc<WorkerStats>,
    worker_id: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = store.publish(&stats.snapshot(&worker_id)).await {
                    warn!(error = %e, "Failed to publish worker heartbeat");
                }
            }
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
