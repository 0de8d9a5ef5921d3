use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::models::stats::WorkerStatsSnapshot;

const HEARTBEAT_KEY: &str = "notifier:workers";

/// Shares per-worker stats through a Redis hash so every worker instance is
/// visible from any one of them.
#[derive(Clone)]
pub struct HeartbeatStore {
    connection: MultiplexedConnection,
}

impl HeartbeatStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis...");

        let client =
            Client::open(redis_url).map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }

    pub async fn publish(&self, snapshot: &WorkerStatsSnapshot) -> Result<(), Error> {
        let value = serde_json::to_string(snapshot)?;
        let mut connection = self.connection.clone();

        connection
            .hset::<_, _, _, ()>(HEARTBEAT_KEY, &snapshot.worker_id, value)
            .await
            .map_err(|e| anyhow!("Failed to publish worker heartbeat: {}", e))?;

        Ok(())
    }

    pub async fn workers(&self) -> Result<Vec<WorkerStatsSnapshot>, Error> {
        let mut connection = self.connection.clone();

        let entries: HashMap<String, String> = connection
            .hgetall(HEARTBEAT_KEY)
            .await
            .map_err(|e| anyhow!("Failed to read worker heartbeats: {}", e))?;

        let mut workers = entries
            .into_iter()
            .filter_map(|(worker_id, value)| {
                match serde_json::from_str::<WorkerStatsSnapshot>(&value) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "Ignoring unreadable heartbeat");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

        Ok(workers)
    }

    pub async fn remove(&self, worker_id: &str) -> Result<(), Error> {
        let mut connection = self.connection.clone();

        connection
            .hdel::<_, _, ()>(HEARTBEAT_KEY, worker_id)
            .await
            .map_err(|e| anyhow!("Failed to remove worker heartbeat: {}", e))?;

        Ok(())
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        connection.ping::<String>().await?;
        Ok(())
    }
}
