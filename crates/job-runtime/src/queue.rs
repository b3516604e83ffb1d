use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use tracing::{info, warn};

use training_core::TrainError;

/// The durable job queue. Tokens are bare job-id strings; payloads live in
/// the relational job store, so a broker or API restart never loses a
/// submitted job.
///
/// Reliable-queue shape: LPUSH onto the pending list, BLMOVE into the
/// processing list (at-least-once: a crashed worker leaves its token there
/// for inspection), LREM to acknowledge, and a capped failed list for dead
/// tokens.
#[derive(Clone)]
pub struct TrainingQueue {
    con: ConnectionManager,
    pending: String,
    processing: String,
    failed: String,
    failed_retention: i64,
}

impl TrainingQueue {
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        failed_retention: i64,
    ) -> Result<Self, TrainError> {
        let client = redis::Client::open(redis_url).map_err(TrainError::system)?;
        let con = client
            .get_connection_manager()
            .await
            .map_err(TrainError::system)?;
        info!(queue = queue_name, "connected to queue broker");
        Ok(Self {
            con,
            pending: queue_name.to_string(),
            processing: format!("{queue_name}:processing"),
            failed: format!("{queue_name}:failed"),
            failed_retention,
        })
    }

    /// Crash-safe enqueue: the token is durable once this returns.
    pub async fn enqueue(&mut self, job_id: &str) -> Result<(), TrainError> {
        let _: () = self
            .con
            .lpush(&self.pending, job_id)
            .await
            .map_err(TrainError::system)?;
        Ok(())
    }

    /// Block up to `timeout_secs` for a token, atomically moving it into
    /// the processing list. None on timeout.
    pub async fn dequeue_blocking(&mut self, timeout_secs: f64) -> Result<Option<String>, TrainError> {
        let token: Option<String> = self
            .con
            .blmove(
                &self.pending,
                &self.processing,
                Direction::Right,
                Direction::Left,
                timeout_secs,
            )
            .await
            .map_err(TrainError::system)?;
        Ok(token)
    }

    /// Acknowledge a processed token.
    pub async fn ack(&mut self, job_id: &str) -> Result<(), TrainError> {
        let _: () = self
            .con
            .lrem(&self.processing, 0, job_id)
            .await
            .map_err(TrainError::system)?;
        Ok(())
    }

    /// Move a token to the capped failed list.
    pub async fn fail(&mut self, job_id: &str) -> Result<(), TrainError> {
        let _: () = self
            .con
            .lrem(&self.processing, 0, job_id)
            .await
            .map_err(TrainError::system)?;
        let _: () = self
            .con
            .lpush(&self.failed, job_id)
            .await
            .map_err(TrainError::system)?;
        let _: () = self
            .con
            .ltrim(&self.failed, 0, (self.failed_retention - 1) as isize)
            .await
            .map_err(TrainError::system)?;
        warn!(job_id, "token moved to failed list");
        Ok(())
    }

    /// Best-effort removal of a token from both pending and processing.
    /// The broker may already have dispatched it; the cancel flag in the
    /// job store covers that window.
    pub async fn remove(&mut self, job_id: &str) -> Result<(), TrainError> {
        let _: () = self
            .con
            .lrem(&self.pending, 0, job_id)
            .await
            .map_err(TrainError::system)?;
        let _: () = self
            .con
            .lrem(&self.processing, 0, job_id)
            .await
            .map_err(TrainError::system)?;
        Ok(())
    }

    /// Number of queued tokens.
    pub async fn pending_depth(&mut self) -> Result<i64, TrainError> {
        self.con
            .llen(&self.pending)
            .await
            .map_err(TrainError::system)
    }

    /// Number of in-flight tokens.
    pub async fn processing_depth(&mut self) -> Result<i64, TrainError> {
        self.con
            .llen(&self.processing)
            .await
            .map_err(TrainError::system)
    }

    /// All queued tokens, newest first.
    pub async fn pending_tokens(&mut self) -> Result<Vec<String>, TrainError> {
        self.con
            .lrange(&self.pending, 0, -1)
            .await
            .map_err(TrainError::system)
    }

    /// All in-flight tokens.
    pub async fn processing_tokens(&mut self) -> Result<Vec<String>, TrainError> {
        self.con
            .lrange(&self.processing, 0, -1)
            .await
            .map_err(TrainError::system)
    }
}
