//! One user session: the job being watched, its poller and the TL;DR stream,
//! all writing into a single [`SyncState`].

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{JobApi, SummaryStreamSource};
use crate::config::ClientConfig;
use crate::errors::{ChannelFailure, SyncError};
use crate::events::{DonePayload, StreamContext};
use crate::http::HttpJobApi;
use crate::model::{JobId, JobStatus, MeetingResult};
use crate::poller::{JobPoller, PollEvents, PollHandle};
use crate::reader::{EventStreamReader, StreamHandler, StreamOutcome};
use crate::state::{StreamTicket, SyncState};

pub struct JobSession {
    session_id: Uuid,
    state: SyncState,
    jobs: Arc<dyn JobApi>,
    streams: Arc<dyn SummaryStreamSource>,
    config: ClientConfig,
    poller: Option<PollHandle>,
}

impl JobSession {
    pub fn new(
        config: ClientConfig,
        jobs: Arc<dyn JobApi>,
        streams: Arc<dyn SummaryStreamSource>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: SyncState::new(),
            jobs,
            streams,
            config,
            poller: None,
        }
    }

    /// Session backed by the HTTP client for both channels.
    pub fn with_http(api: HttpJobApi) -> Self {
        let config = api.config().clone();
        let api = Arc::new(api);
        Self::new(config, api.clone(), api)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Shared state handle; clone it to read or subscribe from elsewhere.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a poller is currently running for this session.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(PollHandle::is_active)
    }

    /// Starts tracking `job_id`. Returns `false` if it was already the current job.
    ///
    /// Must be called within a tokio runtime.
    pub fn watch_job(&mut self, job_id: JobId) -> bool {
        if !self.state.watch_job(job_id.clone()) {
            return false;
        }
        self.cancel_poller();

        let events = Arc::new(SessionPollEvents {
            state: self.state.clone(),
            job_id: job_id.clone(),
        });
        info!(session_id = %self.session_id, %job_id, "watching job");
        self.poller = Some(JobPoller::start(
            job_id,
            self.config.poll_interval,
            self.jobs.clone(),
            events,
        ));
        true
    }

    /// Streams the TL;DR for the current job into the state until the stream ends.
    ///
    /// Open failures are recorded in the state as well as returned. Once the
    /// stream is open, its outcome is returned as a value.
    pub async fn stream_summary(&self) -> Result<StreamOutcome, SyncError> {
        if self.state.current_job().is_none() {
            return Err(SyncError::NoActiveJob);
        }
        let ticket = self.state.begin_stream().ok_or(SyncError::AlreadyStreaming)?;
        let job_id = ticket.job_id().clone();
        let generation = ticket.generation();
        info!(session_id = %self.session_id, %job_id, generation, "opening summary stream");

        let mut handler = SessionStreamHandler {
            state: &self.state,
            ticket,
        };
        let stream = match self.streams.open_summary_stream(&job_id).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(session_id = %self.session_id, %job_id, error = %err, "summary stream failed to open");
                handler.on_error(ChannelFailure::from(err.clone()));
                return Err(err.into());
            }
        };

        let outcome = EventStreamReader::new().consume(stream, &mut handler).await;
        info!(
            session_id = %self.session_id,
            %job_id,
            generation,
            done = outcome.is_done(),
            "summary stream closed"
        );
        Ok(outcome)
    }

    /// Stops polling. The state keeps its last values.
    pub fn close(&mut self) {
        self.cancel_poller();
        self.state.set_polling(false);
    }

    fn cancel_poller(&mut self) {
        if let Some(handle) = self.poller.take()
            && handle.cancel()
        {
            info!(session_id = %self.session_id, job_id = %handle.job_id(), "poller cancelled");
        }
    }
}

impl Drop for JobSession {
    fn drop(&mut self) {
        self.cancel_poller();
    }
}

struct SessionPollEvents {
    state: SyncState,
    job_id: JobId,
}

impl PollEvents for SessionPollEvents {
    fn on_status(&self, status: JobStatus) {
        self.state.set_status_for(&self.job_id, status);
    }

    fn on_done(&self, result: MeetingResult) {
        self.state.complete_job(&self.job_id, result);
    }

    fn on_error(&self, failure: ChannelFailure) {
        self.state.fail_job(&self.job_id, failure.message());
    }
}

/// Routes stream callbacks into the state while `ticket` still owns the stream.
struct SessionStreamHandler<'a> {
    state: &'a SyncState,
    ticket: StreamTicket,
}

impl StreamHandler for SessionStreamHandler<'_> {
    fn on_context(&mut self, context: StreamContext) {
        self.state.set_context_for(&self.ticket, context);
    }

    fn on_token(&mut self, text: String) {
        self.state.append_token_for(&self.ticket, &text);
    }

    fn on_done(&mut self, _payload: DonePayload) {
        self.state.stop_stream_for(&self.ticket);
    }

    fn on_error(&mut self, failure: ChannelFailure) {
        self.state.fail_stream(&self.ticket, failure.message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ByteStream;
    use crate::errors::ApiError;
    use crate::model::StatusResponse;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(1_200);

    #[derive(Default)]
    struct FakeBackend {
        statuses: Mutex<VecDeque<StatusResponse>>,
        chunks: Mutex<Option<Vec<&'static str>>>,
    }

    impl FakeBackend {
        fn with_statuses(statuses: Vec<StatusResponse>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.into()),
                chunks: Mutex::new(None),
            })
        }

        fn with_stream(chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::default(),
                chunks: Mutex::new(Some(chunks)),
            })
        }
    }

    #[async_trait::async_trait]
    impl JobApi for FakeBackend {
        async fn get_status(&self, _job_id: &JobId) -> Result<StatusResponse, ApiError> {
            Ok(self
                .statuses
                .lock()
                .expect("statuses")
                .pop_front()
                .unwrap_or_else(|| StatusResponse::new(JobStatus::Working)))
        }

        async fn get_result(&self, job_id: &JobId) -> Result<MeetingResult, ApiError> {
            Ok(serde_json::from_value(serde_json::json!({ "job_id": job_id })).expect("result"))
        }
    }

    #[async_trait::async_trait]
    impl SummaryStreamSource for FakeBackend {
        async fn open_summary_stream(&self, _job_id: &JobId) -> Result<ByteStream, ApiError> {
            let chunks = self
                .chunks
                .lock()
                .expect("chunks")
                .take()
                .ok_or_else(|| ApiError::http(404, "Job not found"))?;
            let items = chunks
                .into_iter()
                .map(|c| Ok::<_, ApiError>(bytes::Bytes::from_static(c.as_bytes())));
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn session(backend: Arc<FakeBackend>) -> JobSession {
        let config = ClientConfig::default().poll_interval(TICK);
        JobSession::new(config, backend.clone(), backend)
    }

    #[tokio::test(start_paused = true)]
    async fn watched_job_completes_in_one_update() {
        let backend = FakeBackend::with_statuses(vec![
            StatusResponse::new(JobStatus::Working),
            StatusResponse::new(JobStatus::Done),
        ]);
        let mut session = session(backend);
        assert!(session.watch_job(JobId::new("j1")));
        assert!(session.state().snapshot().polling);

        tokio::time::sleep(TICK * 3).await;
        let snapshot = session.state().snapshot();
        assert_eq!(snapshot.status, JobStatus::Done);
        assert!(!snapshot.polling);
        assert_eq!(
            snapshot.result.map(|r| r.job_id.clone()),
            Some(JobId::new("j1"))
        );
        assert!(!session.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_records_server_message() {
        let backend = FakeBackend::with_statuses(vec![StatusResponse::failed("ASR crashed")]);
        let mut session = session(backend);
        session.watch_job(JobId::new("j1"));
        tokio::time::sleep(TICK * 2).await;
        let snapshot = session.state().snapshot();
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("ASR crashed"));
        assert!(!snapshot.polling);
    }

    #[tokio::test(start_paused = true)]
    async fn watching_same_job_twice_is_noop() {
        let mut session = session(FakeBackend::with_statuses(vec![]));
        assert!(session.watch_job(JobId::new("j1")));
        assert!(!session.watch_job(JobId::new("j1")));
        assert!(session.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_jobs_cancels_previous_poller() {
        let mut session = session(FakeBackend::with_statuses(vec![]));
        session.watch_job(JobId::new("old"));
        let old = session.poller.clone().expect("poller");
        session.watch_job(JobId::new("new"));
        assert!(!old.is_active());
        assert!(session.is_polling());
        assert_eq!(session.state().current_job(), Some(JobId::new("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_polling() {
        let mut session = session(FakeBackend::with_statuses(vec![]));
        session.watch_job(JobId::new("j1"));
        session.close();
        assert!(!session.is_polling());
        assert!(!session.state().snapshot().polling);
    }

    #[tokio::test]
    async fn stream_summary_without_job_fails() {
        let session = session(FakeBackend::with_stream(vec![]));
        assert!(matches!(
            session.stream_summary().await,
            Err(SyncError::NoActiveJob)
        ));
    }

    #[tokio::test]
    async fn stream_summary_fills_tldr_and_context() {
        let backend = FakeBackend::with_stream(vec![
            "event: context\ndata: {\"language\":\"ru\"}\n\n",
            "event: token\ndata: {\"t\":\"Hello \"}\n\nevent: tok",
            "en\ndata: {\"t\":\"world\"}\n\nevent: done\ndata: {}\n\n",
        ]);
        let mut session = session(backend);
        session.state().set_job(JobId::new("j1"));
        let outcome = session.stream_summary().await.expect("stream");
        assert!(outcome.is_done());
        let stream = session.state().snapshot().stream;
        assert_eq!(stream.tldr_stream, "Hello world");
        assert!(!stream.streaming);
        assert_eq!(
            stream.last_context.and_then(|c| c.get("language").cloned()),
            Some(serde_json::json!("ru"))
        );
        session.close();
    }

    #[tokio::test]
    async fn server_error_frame_sets_error_and_stops() {
        let backend = FakeBackend::with_stream(vec![
            "event: token\ndata: {\"t\":\"partial\"}\n\n",
            "event: error\ndata: {\"message\":\"LLM unavailable\"}\n\n",
        ]);
        let session = session(backend);
        session.state().set_job(JobId::new("j1"));
        let outcome = session.stream_summary().await.expect("stream");
        assert_eq!(
            outcome,
            StreamOutcome::Failed(ChannelFailure::server("LLM unavailable"))
        );
        let snapshot = session.state().snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("LLM unavailable"));
        assert_eq!(snapshot.stream.tldr_stream, "partial");
        assert!(!snapshot.stream.streaming);
    }

    #[tokio::test]
    async fn open_failure_is_recorded_and_returned() {
        let backend = FakeBackend::with_statuses(vec![]);
        let session = session(backend);
        session.state().set_job(JobId::new("j1"));
        let err = session.stream_summary().await.expect_err("open fails");
        assert!(matches!(err, SyncError::Api(ApiError::Http { status: 404, .. })));
        let snapshot = session.state().snapshot();
        assert!(!snapshot.stream.streaming);
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn second_stream_while_running_is_rejected() {
        let session = session(FakeBackend::with_stream(vec![]));
        session.state().set_job(JobId::new("j1"));
        assert!(session.state().begin_stream().is_some());
        assert!(matches!(
            session.stream_summary().await,
            Err(SyncError::AlreadyStreaming)
        ));
    }
}
