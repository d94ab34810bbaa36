use std::pin::Pin;

use crate::errors::ApiError;
use crate::model::{JobId, MeetingResult, StatusResponse};

/// Raw chunks of an open summary stream, in arrival order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ApiError>> + Send + 'static>>;

/// Job status/result queries used by the poller.
#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    async fn get_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError>;

    async fn get_result(&self, job_id: &JobId) -> Result<MeetingResult, ApiError>;
}

/// Opens the incremental summary stream for a finished job.
#[async_trait::async_trait]
pub trait SummaryStreamSource: Send + Sync {
    async fn open_summary_stream(&self, job_id: &JobId) -> Result<ByteStream, ApiError>;
}
