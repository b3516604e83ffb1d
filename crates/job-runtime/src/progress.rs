use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use optimizer::ProgressSink;

use crate::store::JobStore;

/// At most one log line per second from the hot path.
const LOG_INTERVAL: Duration = Duration::from_secs(1);
/// At most one queued DB write per half second for bar-level progress.
const DB_INTERVAL: Duration = Duration::from_millis(500);

/// One progress snapshot on its way to the job store.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub progress_pct: f64,
    pub current_episode: i32,
    pub total_episodes: i32,
    pub current_candle: i32,
    pub total_candles: i32,
    pub best_score: Option<f64>,
}

/// A wall-clock gate. `allow` consumes the window; callers that lose the
/// race simply skip their update.
struct Throttle {
    last: Mutex<Option<Instant>>,
    interval: Duration,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
        }
    }

    fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// The sendable callback object the optimizer carries into its compute
/// threads: a job id plus two throttle clocks (log, DB). Updates that
/// survive throttling are handed to an unbounded channel and written by the
/// async task from `spawn_writer` — the trial hot path never waits on the
/// database.
pub struct ProgressPublisher {
    job_id: Uuid,
    tx: mpsc::UnboundedSender<ProgressEvent>,
    log_throttle: Throttle,
    db_throttle: Throttle,
}

impl ProgressPublisher {
    /// Returns the publisher and the receiving end for `spawn_writer`.
    pub fn new(job_id: Uuid) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                job_id,
                tx,
                log_throttle: Throttle::new(LOG_INTERVAL),
                db_throttle: Throttle::new(DB_INTERVAL),
            },
            rx,
        )
    }

    fn send(&self, event: ProgressEvent) {
        // The writer hanging up (job teardown) is not the hot path's problem
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ProgressPublisher {
    fn on_trial_complete(&self, completed: usize, total: usize, best_score: Option<f64>) {
        let pct = overall_pct(completed, total, 0.0);
        if self.log_throttle.allow() || completed == total {
            info!(
                job_id = %self.job_id,
                episode = completed,
                total_episodes = total,
                best_score,
                progress_pct = pct,
                "trial complete"
            );
        }
        // The final trial always lands so 100% is never throttled away
        if completed == total || self.db_throttle.allow() {
            self.send(ProgressEvent {
                progress_pct: pct,
                current_episode: completed as i32,
                total_episodes: total as i32,
                current_candle: 0,
                total_candles: 0,
                best_score,
            });
        }
    }

    fn on_bar_progress(
        &self,
        completed_trials: usize,
        total_trials: usize,
        current_bar: usize,
        total_bars: usize,
    ) {
        if total_bars == 0 || !self.db_throttle.allow() {
            return;
        }
        let frac = current_bar as f64 / total_bars as f64;
        self.send(ProgressEvent {
            progress_pct: overall_pct(completed_trials, total_trials, frac),
            current_episode: completed_trials as i32,
            total_episodes: total_trials as i32,
            current_candle: current_bar as i32,
            total_candles: total_bars as i32,
            best_score: None,
        });
    }
}

/// Drain progress events into the job store. Ends when the publisher is
/// dropped; the worker awaits the handle before finalizing the job.
pub fn spawn_writer(
    store: JobStore,
    job_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let write = store
                .update_progress(
                    job_id,
                    event.progress_pct,
                    event.current_episode,
                    event.total_episodes,
                    event.current_candle,
                    event.total_candles,
                    event.best_score,
                )
                .await;
            if let Err(err) = write {
                warn!(job_id = %job_id, error = %err, "progress write failed");
            }
        }
    })
}

/// Overall percent: completed trials plus the active trial's bar fraction,
/// bounded to [0, 100] and rounded to two decimals.
pub fn overall_pct(completed: usize, total: usize, trial_fraction: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = (completed as f64 + trial_fraction.clamp(0.0, 1.0)) / total as f64 * 100.0;
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_pct_is_bounded_and_rounded() {
        assert_eq!(overall_pct(0, 0, 0.5), 0.0);
        assert_eq!(overall_pct(0, 200, 0.0), 0.0);
        assert_eq!(overall_pct(200, 200, 0.0), 100.0);
        assert_eq!(overall_pct(1, 3, 0.0), 33.33);
        // An over-reported fraction can never push past the next trial
        assert_eq!(overall_pct(199, 200, 5.0), 100.0);
        assert!(overall_pct(100, 200, 0.5) <= overall_pct(101, 200, 0.0));
    }

    #[test]
    fn overall_pct_is_monotone_in_its_inputs() {
        let mut prev = 0.0;
        for completed in 0..50 {
            for tenth in 0..10 {
                let pct = overall_pct(completed, 50, tenth as f64 / 10.0);
                assert!(pct + 1e-9 >= prev, "{completed}/{tenth} regressed");
                prev = pct;
            }
        }
    }

    #[test]
    fn throttle_opens_then_closes_the_window() {
        let t = Throttle::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(t.allow_at(start));
        assert!(!t.allow_at(start + Duration::from_millis(100)));
        assert!(!t.allow_at(start + Duration::from_millis(499)));
        assert!(t.allow_at(start + Duration::from_millis(500)));
        assert!(!t.allow_at(start + Duration::from_millis(700)));
    }

    #[test]
    fn final_trial_bypasses_the_db_throttle() {
        let (publisher, mut rx) = ProgressPublisher::new(Uuid::new_v4());
        // Exhaust the throttle window, then complete the run
        publisher.on_trial_complete(1, 10, Some(0.5));
        publisher.on_trial_complete(10, 10, Some(1.0));

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        let last = events.last().expect("final event must be delivered");
        assert_eq!(last.progress_pct, 100.0);
        assert_eq!(last.current_episode, 10);
    }
}
