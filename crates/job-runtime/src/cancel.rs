use sysinfo::{Signal, System};
use tracing::{info, warn};
use uuid::Uuid;

use training_core::TrainError;

use crate::queue::TrainingQueue;
use crate::store::JobStore;

/// Binary name of the worker tier, as the OS reports it.
pub const WORKER_PROCESS_NAME: &str = "training-worker";

/// A worker burning at least this much of one core after a cancel is a
/// runaway compute and gets killed outright.
pub const RUNAWAY_CPU_THRESHOLD: f32 = 50.0;

/// Full cancellation path. A cooperative flag alone is not enough: a trial
/// stuck in a tight numeric loop never reaches a checkpoint, so the layers
/// are (1) mark CANCELLED in the store, (2) pull the token from the queue
/// (best effort — the broker may already have dispatched it), (3) SIGKILL
/// any runaway worker process, (4) the service supervisor restarts the
/// worker, (5) the orphan sweep catches jobs left RUNNING with no live
/// worker. Returns false when the job was already terminal.
pub async fn cancel_job(
    store: &JobStore,
    queue: &mut TrainingQueue,
    job_id: Uuid,
) -> Result<bool, TrainError> {
    let marked = store.mark_cancelled(job_id).await?;
    if marked {
        info!(job_id = %job_id, "job marked cancelled");
    }

    if let Err(err) = queue.remove(&job_id.to_string()).await {
        warn!(job_id = %job_id, error = %err, "token removal failed; worker-side flag will catch it");
    }

    // CPU sampling sleeps between refreshes; keep it off the async runtime
    let killed = tokio::task::spawn_blocking(|| kill_runaway_workers(RUNAWAY_CPU_THRESHOLD))
        .await
        .map_err(TrainError::system)?;
    if killed > 0 {
        orphan_sweep(store).await?;
    }

    Ok(marked)
}

/// SIGKILL every worker-binary process (other than the caller) whose CPU
/// share is at or above `cpu_threshold` percent of one core. Uses in-process
/// OS introspection, so the worker's runtime PATH cannot break the cleanup.
pub fn kill_runaway_workers(cpu_threshold: f32) -> usize {
    let mut sys = System::new();
    sys.refresh_processes();
    // CPU usage is a delta between two samples
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_processes();

    let self_pid = sysinfo::get_current_pid().ok();
    let mut killed = 0usize;
    for (pid, process) in sys.processes() {
        if Some(*pid) == self_pid {
            continue;
        }
        if process.name() != WORKER_PROCESS_NAME {
            continue;
        }
        let cpu = process.cpu_usage();
        if cpu < cpu_threshold {
            continue;
        }
        let sent = process
            .kill_with(Signal::Kill)
            .unwrap_or_else(|| process.kill());
        if sent {
            warn!(pid = pid.as_u32(), cpu, "killed runaway worker process");
            killed += 1;
        }
    }
    killed
}

/// Count live worker-binary processes, excluding the caller.
pub fn live_worker_count() -> usize {
    let mut sys = System::new();
    sys.refresh_processes();
    let self_pid = sysinfo::get_current_pid().ok();
    sys.processes()
        .iter()
        .filter(|(pid, process)| {
            Some(**pid) != self_pid && process.name() == WORKER_PROCESS_NAME
        })
        .count()
}

/// Close the cancellation gap: a RUNNING job with no live worker process
/// can never finish, so sweep it to CANCELLED. Runs at worker startup and
/// after a kill.
pub async fn orphan_sweep(store: &JobStore) -> Result<Vec<Uuid>, TrainError> {
    if live_worker_count() > 0 {
        return Ok(Vec::new());
    }
    store.cancel_all_running().await
}
