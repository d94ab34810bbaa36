//! Common imports for driving a job session.
pub use crate::{
    ChannelFailure, ClientConfig, ExportFormat, HttpJobApi, JobId, JobSession, JobStatus,
    MeetingResult, Snapshot, StreamOutcome, SyncError, SyncState,
};
