use serde::{Deserialize, Serialize};

use crate::errors::SkipReason;
use crate::frame::Frame;

/// Decoded `context` payload: language, action items, decisions, risks, ...
pub type StreamContext = serde_json::Map<String, serde_json::Value>;

/// Payload of the terminal `done` event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonePayload {
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Typed events carried by the summary stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Display context merged into the view.
    Context(StreamContext),
    /// One incremental text fragment.
    Token(String),
    /// Terminal success.
    Done(DonePayload),
    /// Terminal failure signalled by the backend.
    Error { message: String },
}

impl StreamEvent {
    /// Returns true if this event ends the stream (`Done` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }

    /// Stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::Token(_) => "token",
            Self::Done(_) => "done",
            Self::Error { .. } => "error",
        }
    }
}

const FALLBACK_ERROR_MESSAGE: &str = "summary stream failed";

/// Maps a frame to a typed event.
///
/// Unknown event names yield `Ok(None)`. A frame whose payload cannot be
/// decoded yields a [`SkipReason`]; the caller drops it and keeps reading.
pub fn decode_frame(frame: &Frame) -> Result<Option<StreamEvent>, SkipReason> {
    let known = matches!(frame.event.as_str(), "context" | "token" | "done" | "error");
    if !known {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(&frame.data).map_err(|e| SkipReason::InvalidJson(e.to_string()))?;

    let event = match frame.event.as_str() {
        "context" => match value {
            serde_json::Value::Object(map) => StreamEvent::Context(map),
            _ => return Err(SkipReason::ContextNotObject),
        },
        "token" => {
            let text = value
                .get("t")
                .and_then(|v| v.as_str())
                .ok_or(SkipReason::MissingTokenText)?;
            StreamEvent::Token(text.to_string())
        }
        "done" => StreamEvent::Done(serde_json::from_value(value).unwrap_or_default()),
        _ => {
            let message = value
                .get("message")
                .and_then(|v| v.as_str())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(FALLBACK_ERROR_MESSAGE);
            StreamEvent::Error {
                message: message.to_string(),
            }
        }
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_events() {
        let token = decode_frame(&Frame::new("token", r#"{"t":"Hi "}"#)).expect("token");
        assert_eq!(token, Some(StreamEvent::Token("Hi ".into())));

        let done = decode_frame(&Frame::new("done", r#"{"finish_reason":"stop"}"#)).expect("done");
        assert_eq!(
            done,
            Some(StreamEvent::Done(DonePayload {
                finish_reason: Some("stop".into())
            }))
        );

        let error = decode_frame(&Frame::new("error", r#"{"message":"quota"}"#)).expect("error");
        assert!(matches!(error, Some(StreamEvent::Error { message }) if message == "quota"));
    }

    #[test]
    fn context_must_be_an_object() {
        let ok = decode_frame(&Frame::new("context", r#"{"language":"ru"}"#)).expect("context");
        assert!(matches!(ok, Some(StreamEvent::Context(map)) if map["language"] == "ru"));
        assert_eq!(
            decode_frame(&Frame::new("context", "[1,2]")),
            Err(SkipReason::ContextNotObject)
        );
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        assert!(matches!(
            decode_frame(&Frame::new("token", "{not json")),
            Err(SkipReason::InvalidJson(_))
        ));
        assert_eq!(
            decode_frame(&Frame::new("token", r#"{"t":5}"#)),
            Err(SkipReason::MissingTokenText)
        );
    }

    #[test]
    fn unknown_events_are_ignored_without_parsing() {
        assert_eq!(decode_frame(&Frame::new("message", "not json")), Ok(None));
    }

    #[test]
    fn error_without_message_uses_fallback() {
        let event = decode_frame(&Frame::new("error", "{}")).expect("error");
        assert!(event.as_ref().is_some_and(StreamEvent::is_terminal));
        assert!(
            matches!(event, Some(StreamEvent::Error { message }) if message == FALLBACK_ERROR_MESSAGE)
        );
    }
}
