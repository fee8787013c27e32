//! Bounded FIFO for frames sent while the socket is down.
//!
//! Frames are flushed in send order once a connection opens. When the queue
//! is full, newly sent frames are dropped and the queued ones are kept.

use std::collections::VecDeque;

use tracing::debug;

pub(crate) struct OutboundQueue {
    frames: VecDeque<String>,
    max_frames: Option<usize>,
}

impl OutboundQueue {
    pub(crate) fn new(max_frames: Option<usize>) -> Self {
        Self {
            frames: VecDeque::new(),
            max_frames,
        }
    }

    /// Queue a frame. Returns false if it was dropped because the queue is full.
    pub(crate) fn push(&mut self, text: String) -> bool {
        if self.max_frames.is_some_and(|max| self.frames.len() >= max) {
            debug!(queued = self.frames.len(), "outbound queue full, dropping frame");
            return false;
        }
        self.frames.push_back(text);
        true
    }

    /// Take every queued frame, oldest first.
    pub(crate) fn drain(&mut self) -> VecDeque<String> {
        std::mem::take(&mut self.frames)
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
