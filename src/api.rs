use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::{
        health::HealthChecker,
        publisher::TopicPublisher,
        queue::{QueueClient, QueueKind},
        redis::HeartbeatStore,
    },
    errors::{PublishError, QueueError},
    models::{
        health::HealthStatus,
        message::Notification,
        response::ApiResponse,
        stats::{QueueStats, WorkerStats, WorkerStatsSnapshot},
        subscription::{SubscriberRole, SubscriptionRequest},
    },
    producer::NotificationProducer,
};

const DEFAULT_DEAD_LETTER_LIMIT: usize = 10;

pub struct AppState {
    pub worker_id: String,
    pub queue: Arc<dyn QueueClient>,
    pub producer: NotificationProducer,
    pub stats: Arc<WorkerStats>,
    pub heartbeats: Option<HeartbeatStore>,
    pub health_checker: HealthChecker,
    pub publisher: Arc<dyn TopicPublisher>,
    pub topic_name: String,
    pub notification_queue_name: String,
    pub dead_letter_queue_name: String,
    /// Cancelled by `POST /worker/stop`; the worker finishes its batch and exits.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Only the pipeline's own queues may be purged.
    fn purgeable(&self, queue_name: &str) -> Option<QueueKind> {
        if queue_name == self.notification_queue_name {
            Some(QueueKind::Notification)
        } else if queue_name == self.dead_letter_queue_name {
            Some(QueueKind::DeadLetter)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub worker: WorkerStatsSnapshot,
    pub workers: Vec<WorkerStatsSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RedriveRequest {
    pub max_messages: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RedriveResponse {
    pub redriven: usize,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub notification: Notification,

    #[serde(default)]
    pub delay_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub queue: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub protocol: Option<String>,
    pub role: Option<SubscriberRole>,
    pub filter_policy: Option<Map<String, Value>>,
}

impl SubscribeRequest {
    /// An explicit filter policy wins over the one derived from `role`.
    fn into_subscription(self) -> SubscriptionRequest {
        let mut subscription =
            SubscriptionRequest::for_role(self.endpoint, self.role.unwrap_or_default());

        if let Some(protocol) = self.protocol {
            subscription.protocol = protocol;
        }
        if let Some(policy) = self.filter_policy {
            subscription = subscription.with_filter_policy(policy);
        }

        subscription
    }
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub subscription_arn: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/dead-letters", get(dead_letters))
        .route("/dead-letters/redrive", post(redrive_dead_letters))
        .route("/notifications", post(enqueue_notification))
        .route("/subscriptions", post(subscribe))
        .route("/purge/{queue_name}", delete(purge_queue))
        .route("/worker/stop", post(stop_worker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Operational API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queue = match state.queue.stats().await {
        Ok(queue) => queue,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<StatsResponse>::error(
                    e.to_string(),
                    "Failed to retrieve queue statistics",
                )),
            );
        }
    };

    let worker = state.stats.snapshot(&state.worker_id);

    let workers = match &state.heartbeats {
        Some(heartbeats) => heartbeats.workers().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read worker heartbeats");
            vec![worker.clone()]
        }),
        None => vec![worker.clone()],
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            StatsResponse {
                queue,
                worker,
                workers,
            },
            "Queue statistics retrieved",
        )),
    )
}

async fn dead_letters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeadLetterQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);

    match state.queue.dead_letters(limit).await {
        Ok(records) => (
            StatusCode::OK,
            Json(ApiResponse::success(records, "Dead letters retrieved")),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(
                e.to_string(),
                "Failed to retrieve dead letters",
            )),
        ),
    }
}

async fn redrive_dead_letters(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RedriveRequest>,
) -> impl IntoResponse {
    let limit = request.max_messages.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);

    match state.queue.redrive_dead_letters(limit).await {
        Ok(redriven) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                RedriveResponse { redriven },
                "Redrive operation completed",
            )),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(e.to_string(), "Failed to redrive dead letters")),
        ),
    }
}

async fn enqueue_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let delay = Duration::from_secs(request.delay_seconds);

    match state.producer.notify_delayed(&request.notification, delay).await {
        Ok(message_id) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                EnqueueResponse { message_id },
                "Notification queued successfully",
            )),
        ),
        Err(e) => {
            let status_code = match e {
                QueueError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };

            (
                status_code,
                Json(ApiResponse::error(e.to_string(), "Failed to queue notification")),
            )
        }
    }
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let subscription = request.into_subscription();

    match state
        .publisher
        .subscribe(&state.topic_name, &subscription)
        .await
    {
        Ok(subscription_arn) => {
            info!(
                endpoint = %subscription.endpoint,
                protocol = %subscription.protocol,
                "Subscription registered"
            );
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    SubscribeResponse { subscription_arn },
                    "Subscription registered",
                )),
            )
        }
        Err(e) => {
            let status_code = match e {
                PublishError::Rejected(_) => StatusCode::BAD_REQUEST,
                PublishError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            };

            (
                status_code,
                Json(ApiResponse::error(e.to_string(), "Failed to register subscription")),
            )
        }
    }
}

async fn purge_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_name): Path<String>,
) -> impl IntoResponse {
    let Some(queue) = state.purgeable(&queue_name) else {
        warn!(queue = %queue_name, "Refused to purge unknown queue");
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<PurgeResponse>::error(
                format!("Queue {} is not managed by this service", queue_name),
                "Purge not allowed",
            )),
        );
    };

    match state.queue.purge(queue).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                PurgeResponse { queue: queue_name },
                "Queue purged",
            )),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(e.to_string(), "Failed to purge queue")),
        ),
    }
}

async fn stop_worker(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!(worker_id = %state.worker_id, "Stop requested through the API");
    state.shutdown.cancel();

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(
            StopResponse {
                worker_id: state.worker_id.clone(),
            },
            "Worker will stop after the current batch",
        )),
    )
}
