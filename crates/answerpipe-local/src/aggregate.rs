//! Stream aggregation: ordered event sequence -> one document.

use crate::extract::event_content;
use answerpipe_core::{Error, GenerationEvent};
use futures_util::{Stream, StreamExt};
use std::ops::ControlFlow;

/// Per-request accumulator. Holds no shared state; create one per stream.
#[derive(Debug, Default)]
pub struct Aggregator {
    fragments: Vec<String>,
    events: usize,
    tool_calls: usize,
}

#[derive(Debug)]
pub struct Aggregated {
    /// Extracted fragments in arrival order, joined by single spaces.
    pub document: String,
    pub events: usize,
    pub tool_calls: usize,
    /// Set when the transport ended abnormally; `document` then holds the partial text.
    pub error: Option<Error>,
}

impl Aggregated {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the event's content, if any. Returns true when something was appended.
    pub fn push(&mut self, ev: &GenerationEvent) -> bool {
        self.events += 1;
        if ev.is_tool_call() {
            self.tool_calls += 1;
        }
        let content = event_content(ev);
        if content.is_empty() {
            return false;
        }
        self.fragments.push(content);
        true
    }

    /// One step of a drain loop: an event is pushed and handed back for observation, a transport
    /// error breaks the loop. Callers pass the error on to [`Aggregator::finish`].
    pub fn feed(
        &mut self,
        item: answerpipe_core::Result<GenerationEvent>,
    ) -> ControlFlow<Error, GenerationEvent> {
        match item {
            Ok(ev) => {
                self.push(&ev);
                ControlFlow::Continue(ev)
            }
            Err(e) => ControlFlow::Break(e),
        }
    }

    pub fn document(&self) -> String {
        self.fragments.join(" ")
    }

    /// Seals the run. `error` records why the transport ended early; the text so far is kept.
    pub fn finish(self, error: Option<Error>) -> Aggregated {
        if let Some(e) = &error {
            tracing::warn!(
                target: "answerpipe::aggregate",
                events = self.events,
                error = %e,
                "event stream ended early"
            );
        }
        Aggregated {
            document: self.document(),
            events: self.events,
            tool_calls: self.tool_calls,
            error,
        }
    }
}

/// Drains `events` in order. A transport error stops consumption and is recorded, not raised.
pub async fn aggregate<S, F>(events: S, mut observe: F) -> Aggregated
where
    S: Stream<Item = answerpipe_core::Result<GenerationEvent>>,
    F: FnMut(&GenerationEvent),
{
    let mut events = std::pin::pin!(events);
    let mut agg = Aggregator::new();
    while let Some(item) = events.next().await {
        match agg.feed(item) {
            ControlFlow::Continue(ev) => observe(&ev),
            ControlFlow::Break(e) => return agg.finish(Some(e)),
        }
    }
    agg.finish(None)
}

/// Non-streaming variant: one fully formed response, extraction only.
pub fn single_shot(ev: &GenerationEvent) -> String {
    event_content(ev)
}
