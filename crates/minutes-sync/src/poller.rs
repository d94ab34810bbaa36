use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::errors::ChannelFailure;
use crate::model::{JobId, JobStatus, MeetingResult};

const FALLBACK_JOB_ERROR: &str = "Job failed";

const PHASE_IDLE: u8 = 0;
const PHASE_ACTIVE: u8 = 1;
const PHASE_STOPPED: u8 = 2;

/// Callbacks fired by a running poller.
///
/// `on_done` and `on_error` are terminal: at most one of them fires, once.
pub trait PollEvents: Send + Sync {
    /// A non-terminal forward transition (`queued -> working`).
    fn on_status(&self, _status: JobStatus) {}

    fn on_done(&self, result: MeetingResult);

    fn on_error(&self, failure: ChannelFailure);
}

/// Not started / active / stopped. Stopping happens once, whoever gets there first.
struct PollControl {
    phase: AtomicU8,
    stop_tx: watch::Sender<bool>,
}

impl PollControl {
    fn new() -> Self {
        let (stop_tx, _rx) = watch::channel(false);
        Self {
            phase: AtomicU8::new(PHASE_IDLE),
            stop_tx,
        }
    }

    fn activate(&self) -> bool {
        self.phase
            .compare_exchange(PHASE_IDLE, PHASE_ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_active(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_ACTIVE
    }

    /// Moves to stopped; returns true only for the call that performed the move.
    fn stop(&self) -> bool {
        if self.phase.swap(PHASE_STOPPED, Ordering::AcqRel) == PHASE_STOPPED {
            return false;
        }
        self.stop_tx.send_replace(true);
        true
    }
}

/// Handle used to cancel a running poller.
///
/// Cancelling is idempotent: only the first call (or the poller reaching a
/// terminal status) stops it; later calls return `false`.
#[derive(Clone)]
pub struct PollHandle {
    job_id: JobId,
    control: Arc<PollControl>,
}

impl PollHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Stops polling. No status request starts after this returns, and an
    /// in-flight status request is abandoned without a callback.
    ///
    /// Once a poll has seen `done`, the result fetch is already committed:
    /// `get_result` still runs and `on_done`/`on_error` still fire. Callers
    /// that switched jobs drop that late write by job id.
    pub fn cancel(&self) -> bool {
        let stopped = self.control.stop();
        if stopped {
            debug!(job_id = %self.job_id, "poller cancelled");
        }
        stopped
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }
}

/// Periodically queries a job's status until it reaches a terminal state.
pub struct JobPoller;

impl JobPoller {
    /// Spawns the polling task on the current tokio runtime.
    ///
    /// The first status request happens one `interval` after start.
    pub fn start(
        job_id: JobId,
        interval: Duration,
        api: Arc<dyn JobApi>,
        events: Arc<dyn PollEvents>,
    ) -> PollHandle {
        let control = Arc::new(PollControl::new());
        let handle = PollHandle {
            job_id: job_id.clone(),
            control: control.clone(),
        };
        if control.activate() {
            info!(%job_id, interval_ms = interval.as_millis() as u64, "poller started");
            tokio::spawn(poll_loop(job_id, interval, api, events, control));
        }
        handle
    }
}

async fn poll_loop(
    job_id: JobId,
    interval: Duration,
    api: Arc<dyn JobApi>,
    events: Arc<dyn PollEvents>,
    control: Arc<PollControl>,
) {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop_rx = control.stop_tx.subscribe();
    let mut observed = JobStatus::Queued;

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => return,
            _ = ticker.tick() => {}
        }
        if !control.is_active() {
            return;
        }

        let response = tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => return,
            response = api.get_status(&job_id) => response,
        };

        let status = match response {
            Ok(status) => status,
            Err(err) => {
                if control.stop() {
                    warn!(%job_id, error = %err, "status request failed; polling stopped");
                    events.on_error(ChannelFailure::from(err));
                }
                return;
            }
        };
        debug!(%job_id, status = %status.status, "status polled");

        match status.status {
            JobStatus::Done => {
                if !control.stop() {
                    return;
                }
                info!(%job_id, "job done; fetching result");
                match api.get_result(&job_id).await {
                    Ok(result) => events.on_done(result),
                    Err(err) => {
                        warn!(%job_id, error = %err, "result request failed");
                        events.on_error(ChannelFailure::from(err));
                    }
                }
                return;
            }
            JobStatus::Error => {
                if control.stop() {
                    let message = status
                        .error
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| FALLBACK_JOB_ERROR.to_string());
                    warn!(%job_id, %message, "job failed");
                    events.on_error(ChannelFailure::server(message));
                }
                return;
            }
            next @ (JobStatus::Queued | JobStatus::Working) => {
                if observed.can_transition_to(next) {
                    observed = next;
                    events.on_status(next);
                }
            }
        }
    }
}

/// Resolves once the stop flag is set. Never resolves otherwise.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
