//! Client-side synchronization for meeting-minutes jobs.
//!
//! Polls a job until it finishes, consumes the incremental TL;DR summary
//! stream, and merges both into one observable [`SyncState`].
//!
//! # Usage
//!
//! ```no_run
//! use minutes_sync::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SyncError> {
//! let mut session = JobSession::with_http(HttpJobApi::from_env()?);
//! session.watch_job(JobId::new("3f2c"));
//!
//! let mut updates = session.state().subscribe();
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow_and_update().clone();
//!     if snapshot.status.is_terminal() {
//!         break;
//!     }
//! }
//!
//! session.stream_summary().await?;
//! println!("{}", session.state().snapshot().stream.tldr_stream);
//! # Ok(())
//! # }
//! ```

/// Collaborator traits for the status, result and stream endpoints.
pub mod api;
/// Client configuration loaded from the environment.
pub mod config;
/// Error taxonomy.
pub mod errors;
/// Typed summary-stream events.
pub mod events;
/// Incremental event-stream framing.
pub mod frame;
/// `reqwest` collaborator.
pub mod http;
/// Job, status and result types.
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
/// Periodic job status polling.
pub mod poller;
/// Common imports for typical usage.
pub mod prelude;
/// Summary-stream consumption and terminal delivery.
pub mod reader;
/// Session wiring of poller and stream into shared state.
pub mod session;
/// Shared, observable session state.
pub mod state;

pub use api::{ByteStream, JobApi, SummaryStreamSource};
pub use config::ClientConfig;
pub use errors::{ApiError, ChannelFailure, SkipReason, SyncError};
pub use events::{DonePayload, StreamContext, StreamEvent, decode_frame};
pub use frame::{Frame, FrameParser};
pub use http::HttpJobApi;
pub use model::{ExportFormat, JobId, JobStatus, MeetingResult, StatusResponse};
pub use observability::init_observability;
pub use poller::{JobPoller, PollEvents, PollHandle};
pub use reader::{EventStreamReader, StreamHandler, StreamOutcome};
pub use session::JobSession;
pub use state::{Snapshot, StreamState, StreamTicket, SyncState};
