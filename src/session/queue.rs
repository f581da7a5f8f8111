use std::collections::VecDeque;
use std::time::Duration;

use crate::types::ResponseItem;

/// Pending items and progress flags for the turn in flight.
///
/// Items keep strict arrival order. A turn either streams `ResponseItem`
/// events ahead of the terminating `Response`, or delivers everything in
/// the `Response` itself; when it streamed, the items repeated inside the
/// `Response` are ignored so nothing plays twice.
#[derive(Default)]
pub(crate) struct TurnState {
    queue: VecDeque<ResponseItem>,
    /// Items arrived but no terminating `Response` yet.
    streaming: bool,
    complete: bool,
    sleep_hint: Option<Duration>,
    end_latched: bool,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streamed item arriving ahead of the terminating response.
    pub fn push_streamed(&mut self, item: ResponseItem) {
        self.streaming = true;
        self.queue.push_back(item);
    }

    /// Terminating response for the turn.
    pub fn merge_response(
        &mut self,
        items: Vec<ResponseItem>,
        sleep_hint: Option<Duration>,
        session_ended: bool,
    ) {
        if !self.streaming {
            self.queue.extend(items);
        }
        self.streaming = false;
        self.complete = true;
        self.sleep_hint = sleep_hint;
        if session_ended {
            self.end_latched = true;
        }
    }

    pub fn pop_next(&mut self) -> Option<ResponseItem> {
        self.queue.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn take_sleep_hint(&mut self) -> Option<Duration> {
        self.sleep_hint.take()
    }

    pub fn end_latched(&self) -> bool {
        self.end_latched
    }

    pub fn latch_end(&mut self) {
        self.end_latched = true;
    }

    /// New user input: the previous turn's pending output is obsolete.
    /// An end latch survives, the session is ending regardless.
    pub fn begin_turn(&mut self) {
        self.queue.clear();
        self.streaming = false;
        self.complete = false;
        self.sleep_hint = None;
    }

    /// Full reset at session teardown.
    pub fn reset(&mut self) {
        self.begin_turn();
        self.end_latched = false;
    }
}
