//! Per-session outbound queue.
//!
//! The queue is a plain state machine: it never touches a socket. The session
//! asks it what to write next and reports back when a write finishes. The
//! message at the head of `pending` is the one currently being written, so at
//! most one write per connection is ever outstanding.

use std::{collections::VecDeque, num::NonZeroUsize};

use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outbound queue exceeded capacity of {capacity} messages")]
pub struct QueueOverflow {
    pub capacity: usize,
}

/// Result of a successful [`OutboundQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Push {
    /// The queue was idle. The caller must start writing this message.
    Start(Message),
    /// A write is already in flight; the message waits its turn.
    Queued,
}

/// What the writer should do after a write completes.
#[derive(Debug, PartialEq, Eq)]
pub enum Next {
    Write(Message),
    Idle,
    /// The write failed and this many undelivered messages were dropped,
    /// the failed one included.
    Discarded(usize),
}

#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    pending: VecDeque<Message>,
    writing: bool,
}

impl OutboundQueue {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            pending: VecDeque::new(),
            writing: false,
        }
    }

    /// Appends a message. Capacity counts the in-flight message too.
    pub fn push(&mut self, message: Message) -> Result<Push, QueueOverflow> {
        if self.pending.len() >= self.capacity {
            return Err(QueueOverflow {
                capacity: self.capacity,
            });
        }

        self.pending.push_back(message);
        if self.writing {
            return Ok(Push::Queued);
        }

        self.writing = true;
        Ok(Push::Start(self.pending[0].clone()))
    }

    /// Reports the outcome of the in-flight write.
    pub fn complete_write(&mut self, ok: bool) -> Next {
        if !ok {
            return Next::Discarded(self.discard());
        }

        self.pending.pop_front();
        match self.pending.front() {
            Some(next) => Next::Write(next.clone()),
            None => {
                self.writing = false;
                Next::Idle
            }
        }
    }

    /// Drops everything still queued, including an in-flight message.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.writing = false;
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
