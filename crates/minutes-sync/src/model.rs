use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend-assigned identifier of a transcription job.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Creates a job id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the job id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of a job as reported by the status endpoint.
///
/// `Queued -> Working -> Done` on success; `Queued | Working -> Error` on
/// failure. `Done` and `Error` are terminal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Working,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Re-observing the current status is not a transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Done | Self::Error, _) => false,
            (Self::Queued, Self::Working | Self::Done | Self::Error) => true,
            (Self::Working, Self::Done | Self::Error) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Working => "working",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /status/{job_id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn new(status: JobStatus) -> Self {
        Self {
            job_id: None,
            status,
            progress: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(JobStatus::Error)
        }
    }
}

/// One timestamped word inside a transcript segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

/// A speaker-attributed paragraph of the transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
}

/// LLM-derived summary of the meeting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub tldr: String,
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Aggregate speech metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub speech_rate_wpm: f64,
    /// Share of talk time per speaker label, in `0.0..=1.0`.
    #[serde(default)]
    pub talk_time: BTreeMap<String, f64>,
    #[serde(default)]
    pub pauses_count: u32,
}

/// Terminal artifact of a job, fetched once from `GET /result/{job_id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeetingResult {
    pub job_id: JobId,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_sec: f64,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub transcript: Transcript,
    #[serde(default)]
    pub summary: Summary,
}

/// Downloadable renderings of a finished job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExportFormat {
    Markdown,
    Json,
    Srt,
    Vtt,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [Self::Markdown, Self::Json, Self::Srt, Self::Vtt];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
        }
    }
}
