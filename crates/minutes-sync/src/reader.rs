use std::fmt::Display;

use futures::{Stream, StreamExt as _};
use tracing::{debug, trace, warn};

use crate::errors::ChannelFailure;
use crate::events::{DonePayload, StreamContext, StreamEvent, decode_frame};
use crate::frame::{Frame, FrameParser};

/// Callbacks invoked by [`EventStreamReader::consume`].
///
/// Exactly one of `on_done` / `on_error` fires per consume call, and nothing
/// fires after it.
pub trait StreamHandler {
    fn on_context(&mut self, _context: StreamContext) {}

    fn on_token(&mut self, text: String);

    fn on_done(&mut self, payload: DonePayload);

    fn on_error(&mut self, failure: ChannelFailure);
}

/// How a consumed stream ended.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    Done(DonePayload),
    Failed(ChannelFailure),
}

impl StreamOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn into_result(self) -> Result<DonePayload, ChannelFailure> {
        match self {
            Self::Done(payload) => Ok(payload),
            Self::Failed(failure) => Err(failure),
        }
    }
}

/// Drives a [`FrameParser`] over a byte stream and dispatches typed events.
#[derive(Debug, Default)]
pub struct EventStreamReader {
    parser: FrameParser,
    frames_seen: u64,
    frames_skipped: u64,
}

impl EventStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `stream` until a terminal frame, a read failure, or end of stream.
    ///
    /// Malformed frames are skipped. A read failure, or a stream that ends
    /// without a `done`/`error` frame, is reported as a transport failure.
    pub async fn consume<S, B, E, H>(mut self, stream: S, handler: &mut H) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        H: StreamHandler + ?Sized,
    {
        let mut stream = std::pin::pin!(stream);
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    let frames = self.parser.feed(chunk);
                    if let Some(outcome) = self.dispatch(frames, handler) {
                        return self.finish(outcome, handler);
                    }
                }
                Some(Err(err)) => {
                    let failure = ChannelFailure::transport(format!("summary stream read failed: {err}"));
                    return self.finish(StreamOutcome::Failed(failure), handler);
                }
                None => {
                    let frames = self.parser.flush();
                    let outcome = self.dispatch(frames, handler).unwrap_or_else(|| {
                        StreamOutcome::Failed(ChannelFailure::transport(
                            "summary stream ended before a terminal event",
                        ))
                    });
                    return self.finish(outcome, handler);
                }
            }
        }
    }

    /// Dispatches non-terminal events; stops at the first terminal one and returns it.
    fn dispatch<H>(&mut self, frames: Vec<Frame>, handler: &mut H) -> Option<StreamOutcome>
    where
        H: StreamHandler + ?Sized,
    {
        for frame in frames {
            self.frames_seen += 1;
            let event = match decode_frame(&frame) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!(event = %frame.event, "ignoring unknown stream event");
                    continue;
                }
                Err(reason) => {
                    self.frames_skipped += 1;
                    warn!(event = %frame.event, %reason, "skipping malformed stream frame");
                    continue;
                }
            };
            trace!(event = event.name(), terminal = event.is_terminal(), "dispatching stream event");
            match event {
                StreamEvent::Context(context) => handler.on_context(context),
                StreamEvent::Token(text) => handler.on_token(text),
                StreamEvent::Done(payload) => return Some(StreamOutcome::Done(payload)),
                StreamEvent::Error { message } => {
                    return Some(StreamOutcome::Failed(ChannelFailure::server(message)));
                }
            }
        }
        None
    }

    fn finish<H>(self, outcome: StreamOutcome, handler: &mut H) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        debug!(
            frames = self.frames_seen,
            skipped = self.frames_skipped,
            done = outcome.is_done(),
            "summary stream finished"
        );
        match &outcome {
            StreamOutcome::Done(payload) => handler.on_done(payload.clone()),
            StreamOutcome::Failed(failure) => handler.on_error(failure.clone()),
        }
        outcome
    }
}
