//! FIFO command queue with a single in-flight slot

use crate::client::ExchangeOutcome;
use northstar_shared::Command;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::error;

/// Per-request completion callback, invoked once with the outcome
pub type Callback = Box<dyn FnOnce(bool) + Send + 'static>;

/// How the submitter wants to hear about completion
pub(crate) enum Completion {
    None,
    Callback(Callback),
    Outcome(oneshot::Sender<ExchangeOutcome>),
}

/// A queued command, owned by the scheduler until it completes
pub(crate) struct CommandRequest {
    pub seq: u64,
    pub command: Command,
    completion: Completion,
}

impl CommandRequest {
    pub fn new(seq: u64, command: Command, completion: Completion) -> Self {
        Self {
            seq,
            command,
            completion,
        }
    }

    /// Deliver the outcome to the submitter. A panicking callback is logged
    /// and contained.
    pub fn complete(self, outcome: ExchangeOutcome) {
        match self.completion {
            Completion::None => {}
            Completion::Callback(callback) => {
                let success = outcome.success;
                if catch_unwind(AssertUnwindSafe(move || callback(success))).is_err() {
                    error!("Completion callback for request {} panicked", self.seq);
                }
            }
            Completion::Outcome(tx) => {
                // Receiver may have been dropped; nobody is waiting then
                let _ = tx.send(outcome);
            }
        }
    }
}

/// Scheduler lifecycle as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing in flight, waiting for work
    Idle,
    /// Head of the queue moved into the slot
    Dequeuing,
    /// Exchange in progress
    InFlight,
    /// Broadcasting the event and running the callback
    Completing,
    /// Worker has exited
    Stopped,
}

struct QueueState {
    items: VecDeque<CommandRequest>,
    cancelled: Vec<CommandRequest>,
    in_flight: Option<u64>,
    next_seq: u64,
    accepting: bool,
    state: SchedulerState,
}

/// Ordered queue plus the active slot, under one lock so that
/// `pending + in_flight` is always read consistently
pub(crate) struct CommandQueue {
    inner: Mutex<QueueState>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                items: VecDeque::new(),
                cancelled: Vec::new(),
                in_flight: None,
                next_seq: 1,
                accepting: true,
                state: SchedulerState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Nothing panics while holding the lock, but don't let a poisoned
        // mutex take the scheduler down with it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the tail, returning the assigned sequence number.
    /// Gives the request back if the queue is closed.
    pub fn push(
        &self,
        command: Command,
        completion: Completion,
    ) -> Result<u64, (Command, Completion)> {
        let mut q = self.lock();
        if !q.accepting {
            return Err((command, completion));
        }
        let seq = q.next_seq;
        q.next_seq += 1;
        q.items.push_back(CommandRequest::new(seq, command, completion));
        Ok(seq)
    }

    /// Move the head into the slot. `None` when empty or when the slot is
    /// still occupied.
    pub fn take_next(&self) -> Option<CommandRequest> {
        let mut q = self.lock();
        if q.in_flight.is_some() {
            return None;
        }
        let request = q.items.pop_front()?;
        q.in_flight = Some(request.seq);
        q.state = SchedulerState::Dequeuing;
        Some(request)
    }

    pub fn set_state(&self, state: SchedulerState) {
        self.lock().state = state;
    }

    /// Release the slot after the request has completed
    pub fn finish(&self, seq: u64) {
        let mut q = self.lock();
        if q.in_flight == Some(seq) {
            q.in_flight = None;
        }
        q.state = SchedulerState::Idle;
    }

    /// Move every request that has not started yet out of the queue. They
    /// wait in the cancelled list until the worker resolves them, so their
    /// outcomes still follow the in-flight one. Returns how many moved.
    pub fn drain_pending(&self) -> usize {
        let mut q = self.lock();
        let drained: Vec<CommandRequest> = q.items.drain(..).collect();
        let count = drained.len();
        q.cancelled.extend(drained);
        count
    }

    /// Cancelled requests not yet resolved, in submission order
    pub fn take_cancelled(&self) -> Vec<CommandRequest> {
        std::mem::take(&mut self.lock().cancelled)
    }

    /// Stop accepting new requests
    pub fn close(&self) {
        self.lock().accepting = false;
    }

    /// True once closed and fully drained
    pub fn is_finished(&self) -> bool {
        let q = self.lock();
        !q.accepting && q.items.is_empty() && q.cancelled.is_empty() && q.in_flight.is_none()
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn pending(&self) -> usize {
        self.lock().items.len()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.lock().in_flight
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }
}
