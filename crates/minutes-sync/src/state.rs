//! Shared read model fed by the poller, the summary stream and user actions.
//!
//! Every operation is a single `send_if_modified` closure on a watch channel,
//! so readers only ever observe whole transitions. Operations return `true`
//! when they changed the snapshot; rejected writes (stale or no-op) return
//! `false` and do not wake subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::debug;

use crate::events::StreamContext;
use crate::model::{JobId, JobStatus, MeetingResult};

/// Live TL;DR stream state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamState {
    pub streaming: bool,
    /// Id of the stream that owns the buffer; `0` when none was started.
    pub generation: u64,
    /// Concatenated tokens; grows only while `streaming` is true.
    pub tldr_stream: String,
    pub last_context: Option<StreamContext>,
}

/// Consistent view of one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    pub result: Option<Arc<MeetingResult>>,
    pub polling: bool,
    pub error: Option<String>,
    pub stream: StreamState,
}

/// Proof of which stream a write comes from.
///
/// Returned by [`SyncState::begin_stream`]. Writes carrying a ticket are
/// dropped once the job changed or another stream took over the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamTicket {
    job_id: JobId,
    generation: u64,
}

impl StreamTicket {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Cheaply clonable handle to the session state.
#[derive(Clone)]
pub struct SyncState {
    tx: Arc<watch::Sender<Snapshot>>,
    generations: Arc<AtomicU64>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self {
            tx: Arc::new(tx),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Receiver woken on every effective change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.tx.borrow().job_id.clone()
    }

    /// Switches to `job_id`, resetting status, result, error and stream in one update.
    ///
    /// Selecting the current job again is a no-op.
    pub fn set_job(&self, job_id: JobId) -> bool {
        self.tx.send_if_modified(|s| reset_for(s, job_id, false))
    }

    /// [`SyncState::set_job`] with polling already on, as one update.
    pub fn watch_job(&self, job_id: JobId) -> bool {
        self.tx.send_if_modified(|s| reset_for(s, job_id, true))
    }

    /// Stores the job result. A result is immutable once set.
    pub fn set_result(&self, result: MeetingResult) -> bool {
        self.tx.send_if_modified(|s| {
            if s.result.is_some() {
                debug!(job_id = %result.job_id, "dropping stale result write");
                return false;
            }
            s.result = Some(Arc::new(result));
            true
        })
    }

    pub fn set_polling(&self, polling: bool) -> bool {
        self.tx.send_if_modified(|s| {
            if s.polling == polling {
                return false;
            }
            s.polling = polling;
            true
        })
    }

    /// Last error wins; `None` clears it.
    pub fn set_error(&self, error: Option<String>) -> bool {
        self.tx.send_if_modified(|s| {
            if s.error == error {
                return false;
            }
            s.error = error;
            true
        })
    }

    /// Applies a forward status transition for the current job.
    pub fn set_status(&self, status: JobStatus) -> bool {
        self.tx.send_if_modified(|s| apply_status(s, status))
    }

    /// Like [`SyncState::set_status`], but only while `job_id` is still current.
    pub fn set_status_for(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.tx.send_if_modified(|s| {
            if !is_current(s, job_id) {
                debug!(%job_id, %status, "dropping status for stale job");
                return false;
            }
            apply_status(s, status)
        })
    }

    /// Records a successful terminal poll: result, `done` status and polling off together.
    pub fn complete_job(&self, job_id: &JobId, result: MeetingResult) -> bool {
        self.tx.send_if_modified(|s| {
            if !is_current(s, job_id) || s.status.is_terminal() {
                debug!(%job_id, "dropping stale completion");
                return false;
            }
            s.status = JobStatus::Done;
            s.result = Some(Arc::new(result));
            s.polling = false;
            true
        })
    }

    /// Records a failed terminal poll: `error` status, message and polling off together.
    pub fn fail_job(&self, job_id: &JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tx.send_if_modified(|s| {
            if !is_current(s, job_id) || s.status.is_terminal() {
                debug!(%job_id, %message, "dropping stale failure");
                return false;
            }
            s.status = JobStatus::Error;
            s.error = Some(message);
            s.polling = false;
            true
        })
    }

    /// Clears the TL;DR buffer and starts accepting untagged tokens.
    ///
    /// Any ticketed stream still running loses the buffer.
    pub fn start_stream(&self) -> bool {
        let generation = self.next_generation();
        self.tx.send_if_modified(|s| {
            s.stream.streaming = true;
            s.stream.generation = generation;
            s.stream.tldr_stream.clear();
            true
        })
    }

    /// Starts a stream for the current job unless one is already running.
    pub fn begin_stream(&self) -> Option<StreamTicket> {
        let generation = self.next_generation();
        let mut ticket = None;
        self.tx.send_if_modified(|s| {
            let Some(job_id) = &s.job_id else {
                return false;
            };
            if s.stream.streaming {
                return false;
            }
            s.stream.streaming = true;
            s.stream.generation = generation;
            s.stream.tldr_stream.clear();
            ticket = Some(StreamTicket {
                job_id: job_id.clone(),
                generation,
            });
            true
        });
        ticket
    }

    /// Appends a token from the stream holding `ticket`; dropped if that stream was superseded.
    pub fn append_token_for(&self, ticket: &StreamTicket, token: &str) -> bool {
        self.tx.send_if_modified(|s| {
            if !owns_stream(s, ticket) {
                debug!(job_id = %ticket.job_id, generation = ticket.generation, "dropping token from stale stream");
                return false;
            }
            push_token(s, token)
        })
    }

    /// Stops the stream holding `ticket`, if it still owns the buffer.
    pub fn stop_stream_for(&self, ticket: &StreamTicket) -> bool {
        self.tx.send_if_modified(|s| {
            if !owns_stream(s, ticket) {
                return false;
            }
            s.stream.streaming = false;
            true
        })
    }

    /// Records a stream failure and stops the stream, in one update.
    pub fn fail_stream(&self, ticket: &StreamTicket, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tx.send_if_modified(|s| {
            if !owns_stream(s, ticket) {
                debug!(job_id = %ticket.job_id, %message, "dropping failure from stale stream");
                return false;
            }
            s.stream.streaming = false;
            s.error = Some(message);
            true
        })
    }

    /// Merges context from the stream holding `ticket`.
    pub fn set_context_for(&self, ticket: &StreamTicket, context: StreamContext) -> bool {
        self.tx.send_if_modified(|s| {
            if s.job_id.as_ref() != Some(&ticket.job_id) || s.stream.generation != ticket.generation {
                return false;
            }
            merge_context(s, context)
        })
    }

    /// Appends a token; ignored unless a stream is active.
    pub fn append_token(&self, token: &str) -> bool {
        self.tx.send_if_modified(|s| push_token(s, token))
    }

    /// Stops accepting tokens; the buffer is kept as-is.
    pub fn stop_stream(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if !s.stream.streaming {
                return false;
            }
            s.stream.streaming = false;
            true
        })
    }

    /// Merges `context` keys into the display context.
    pub fn set_context(&self, context: StreamContext) -> bool {
        self.tx.send_if_modified(|s| merge_context(s, context))
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn reset_for(snapshot: &mut Snapshot, job_id: JobId, polling: bool) -> bool {
    if snapshot.job_id.as_ref() == Some(&job_id) {
        return false;
    }
    *snapshot = Snapshot {
        job_id: Some(job_id),
        polling,
        ..Snapshot::default()
    };
    true
}

fn owns_stream(snapshot: &Snapshot, ticket: &StreamTicket) -> bool {
    snapshot.stream.streaming
        && snapshot.stream.generation == ticket.generation
        && snapshot.job_id.as_ref() == Some(&ticket.job_id)
}

fn push_token(snapshot: &mut Snapshot, token: &str) -> bool {
    if !snapshot.stream.streaming {
        debug!(len = token.len() as u64, "dropping token outside active stream");
        return false;
    }
    if token.is_empty() {
        return false;
    }
    snapshot.stream.tldr_stream.push_str(token);
    true
}

fn merge_context(snapshot: &mut Snapshot, context: StreamContext) -> bool {
    match &mut snapshot.stream.last_context {
        Some(current) => {
            let before = current.clone();
            current.extend(context);
            *current != before
        }
        None => {
            snapshot.stream.last_context = Some(context);
            true
        }
    }
}

fn is_current(snapshot: &Snapshot, job_id: &JobId) -> bool {
    snapshot.job_id.as_ref() == Some(job_id)
}

fn apply_status(snapshot: &mut Snapshot, status: JobStatus) -> bool {
    if snapshot.job_id.is_none() || !snapshot.status.can_transition_to(status) {
        return false;
    }
    snapshot.status = status;
    if status.is_terminal() {
        snapshot.polling = false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MeetingResult;
    use pretty_assertions::assert_eq;

    fn result_for(job: &str) -> MeetingResult {
        serde_json::from_value(serde_json::json!({ "job_id": job, "duration_sec": 12.0 }))
            .expect("result")
    }

    #[test]
    fn streams_tokens_between_start_and_stop() {
        let state = SyncState::new();
        state.start_stream();
        state.append_token("Hello ");
        state.append_token("world");
        assert_eq!(state.snapshot().stream.tldr_stream, "Hello world");
        state.stop_stream();
        assert!(!state.snapshot().stream.streaming);
    }

    #[test]
    fn tokens_after_stop_are_ignored() {
        let state = SyncState::new();
        state.start_stream();
        state.append_token("kept");
        state.stop_stream();
        assert!(!state.append_token(" late"));
        assert_eq!(state.snapshot().stream.tldr_stream, "kept");
    }

    #[test]
    fn start_stream_resets_buffer() {
        let state = SyncState::new();
        state.start_stream();
        state.append_token("old");
        state.stop_stream();
        assert!(state.start_stream());
        let snapshot = state.snapshot();
        assert!(snapshot.stream.streaming);
        assert_eq!(snapshot.stream.tldr_stream, "");
    }

    #[test]
    fn begin_stream_needs_a_job_and_no_running_stream() {
        let state = SyncState::new();
        assert_eq!(state.begin_stream(), None);
        state.set_job(JobId::new("a"));
        let first = state.begin_stream().expect("first stream");
        assert_eq!(state.begin_stream(), None);
        state.stop_stream();
        let second = state.begin_stream().expect("second stream");
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn superseded_stream_cannot_touch_new_stream_of_same_job() {
        let state = SyncState::new();
        let job = JobId::new("a");
        state.set_job(job.clone());
        let old = state.begin_stream().expect("old stream");
        assert!(state.append_token_for(&old, "old "));

        state.set_job(JobId::new("b"));
        state.set_job(job.clone());
        let fresh = state.begin_stream().expect("fresh stream");
        assert_eq!(fresh.job_id(), &job);
        assert!(state.append_token_for(&fresh, "fresh "));

        assert!(!state.append_token_for(&old, "STALE"));
        assert!(!state.set_context_for(&old, serde_json::Map::new()));
        assert!(!state.fail_stream(&old, "old failure"));
        assert!(!state.stop_stream_for(&old));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.stream.tldr_stream, "fresh ");
        assert!(snapshot.stream.streaming);
        assert_eq!(snapshot.error, None);

        assert!(state.stop_stream_for(&fresh));
        assert!(!state.append_token_for(&fresh, "late"));
    }

    #[test]
    fn fail_stream_sets_error_and_stops_together() {
        let state = SyncState::new();
        state.set_job(JobId::new("a"));
        let ticket = state.begin_stream().expect("stream");
        let mut rx = state.subscribe();
        rx.borrow_and_update();
        assert!(state.fail_stream(&ticket, "LLM unavailable"));
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.error.as_deref(), Some("LLM unavailable"));
        assert!(!seen.stream.streaming);
    }

    #[test]
    fn watch_job_resets_and_marks_polling_in_one_update() {
        let state = SyncState::new();
        state.set_job(JobId::new("a"));
        let mut rx = state.subscribe();
        rx.borrow_and_update();
        assert!(state.watch_job(JobId::new("b")));
        assert_eq!(
            *rx.borrow_and_update(),
            Snapshot {
                job_id: Some(JobId::new("b")),
                polling: true,
                ..Snapshot::default()
            }
        );
        assert!(!state.watch_job(JobId::new("b")));
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[test]
    fn set_job_resets_everything_at_once() {
        let state = SyncState::new();
        state.set_job(JobId::new("a"));
        state.fail_job(&JobId::new("a"), "boom");
        state.start_stream();
        state.append_token("x");

        let mut rx = state.subscribe();
        rx.borrow_and_update();
        assert!(state.set_job(JobId::new("b")));
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(
            *rx.borrow_and_update(),
            Snapshot {
                job_id: Some(JobId::new("b")),
                ..Snapshot::default()
            }
        );
    }

    #[test]
    fn set_job_with_same_id_is_noop() {
        let state = SyncState::new();
        state.set_job(JobId::new("a"));
        state.set_status(JobStatus::Working);
        let mut rx = state.subscribe();
        rx.borrow_and_update();
        assert!(!state.set_job(JobId::new("a")));
        assert!(!rx.has_changed().expect("sender alive"));
        assert_eq!(state.snapshot().status, JobStatus::Working);
    }

    #[test]
    fn terminal_status_never_changes() {
        let state = SyncState::new();
        let job = JobId::new("a");
        state.set_job(job.clone());
        state.set_polling(true);
        assert!(state.complete_job(&job, result_for("a")));
        assert!(!state.set_status(JobStatus::Working));
        assert!(!state.fail_job(&job, "late"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, JobStatus::Done);
        assert!(!snapshot.polling);
        assert_eq!(snapshot.error, None);
        assert!(snapshot.result.is_some());
    }

    #[test]
    fn writes_for_previous_job_are_dropped() {
        let state = SyncState::new();
        let old = JobId::new("old");
        state.set_job(old.clone());
        state.set_job(JobId::new("new"));
        assert!(!state.set_status_for(&old, JobStatus::Working));
        assert!(!state.complete_job(&old, result_for("old")));
        assert!(!state.fail_job(&old, "boom"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert!(snapshot.result.is_none());
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn result_is_immutable_once_set() {
        let state = SyncState::new();
        state.set_job(JobId::new("a"));
        assert!(state.set_result(result_for("a")));
        assert!(!state.set_result(result_for("b")));
        assert_eq!(
            state.snapshot().result.map(|r| r.job_id.clone()),
            Some(JobId::new("a"))
        );
    }

    #[test]
    fn context_is_merged_and_noop_merges_do_not_notify() {
        let state = SyncState::new();
        let first = serde_json::json!({"language": "ru", "risks": []});
        let second = serde_json::json!({"decisions": ["ship"]});
        let as_map = |v: serde_json::Value| match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(state.set_context(as_map(first)));
        assert!(state.set_context(as_map(second)));
        assert!(!state.set_context(as_map(serde_json::json!({"language": "ru"}))));
        let context = state.snapshot().stream.last_context.expect("context");
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn last_error_wins_until_cleared() {
        let state = SyncState::new();
        state.set_error(Some("first".into()));
        state.set_error(Some("second".into()));
        assert_eq!(state.snapshot().error.as_deref(), Some("second"));
        assert!(state.set_error(None));
        assert_eq!(state.snapshot().error, None);
    }

    #[test]
    fn concurrent_appends_are_not_torn() {
        let state = SyncState::new();
        state.start_stream();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        state.append_token("ab");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        let text = state.snapshot().stream.tldr_stream;
        assert_eq!(text.len(), 2_000);
        assert!(text.as_bytes().chunks(2).all(|pair| pair == b"ab"));
    }
}
