//! FIFO of pending requests. The head is the only request that may be in
//! flight; replies always resolve the head.

use crate::error::{WorkerError, WorkerResult};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub(crate) type OutcomeSender<T> = oneshot::Sender<WorkerResult<T>>;

/// One submitted request awaiting its outcome.
pub(crate) struct PendingRequest<Req, Resp> {
    pub(crate) id: u64,
    pub(crate) payload: Req,
    outcome: OutcomeSender<Resp>,
    pub(crate) submitted_at: Instant,
    /// Written to the current worker's stdin and not yet resolved.
    pub(crate) started: bool,
    /// Armed when started; cleared when resolved or when the worker dies.
    pub(crate) deadline: Option<Instant>,
}

impl<Req, Resp> PendingRequest<Req, Resp> {
    /// Consumes the request, so an outcome can only ever be written once.
    pub(crate) fn resolve(self, result: WorkerResult<Resp>) {
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.outcome.send(result);
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submitted_at)
    }
}

pub(crate) struct RequestQueue<Req, Resp> {
    items: VecDeque<PendingRequest<Req, Resp>>,
    next_id: u64,
    max_depth: Option<usize>,
}

impl<Req, Resp> RequestQueue<Req, Resp> {
    pub(crate) fn new(max_depth: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            next_id: 1,
            max_depth,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append to the tail. A full queue hands the outcome back with `QueueFull`.
    pub(crate) fn push(
        &mut self,
        payload: Req,
        outcome: OutcomeSender<Resp>,
        now: Instant,
    ) -> Result<u64, (WorkerError, OutcomeSender<Resp>)> {
        if let Some(max) = self.max_depth {
            if self.items.len() >= max {
                return Err((WorkerError::QueueFull { depth: self.items.len() }, outcome));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.items.push_back(PendingRequest {
            id,
            payload,
            outcome,
            submitted_at: now,
            started: false,
            deadline: None,
        });
        Ok(id)
    }

    /// The in-flight request, if the head has been started.
    pub(crate) fn in_flight(&self) -> Option<&PendingRequest<Req, Resp>> {
        self.items.front().filter(|r| r.started)
    }

    /// Mark the head started and arm its deadline. `None` when the queue is
    /// empty or the head is already in flight.
    pub(crate) fn start_head(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> Option<&PendingRequest<Req, Resp>> {
        let head = self.items.front_mut()?;
        if head.started {
            return None;
        }
        head.started = true;
        head.deadline = Some(now + timeout);
        Some(head)
    }

    /// Pop the head if it is in flight (a reply arrived for it).
    pub(crate) fn take_in_flight(&mut self) -> Option<PendingRequest<Req, Resp>> {
        if self.in_flight().is_some() {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Pop the head only if it is still the request `id` whose deadline fired.
    pub(crate) fn expire(&mut self, id: u64) -> Option<PendingRequest<Req, Resp>> {
        match self.items.front() {
            Some(head) if head.id == id && head.started => self.items.pop_front(),
            _ => None,
        }
    }

    /// Pop the head unconditionally (e.g. it could not be encoded).
    pub(crate) fn pop_head(&mut self) -> Option<PendingRequest<Req, Resp>> {
        self.items.pop_front()
    }

    /// The worker died mid-request: keep the head queued for the next worker.
    pub(crate) fn requeue_in_flight(&mut self) -> Option<u64> {
        let head = self.items.front_mut().filter(|r| r.started)?;
        head.started = false;
        head.deadline = None;
        Some(head.id)
    }

    /// Deadline of the in-flight request, with its id.
    pub(crate) fn next_deadline(&self) -> Option<(u64, Instant)> {
        self.in_flight()
            .and_then(|r| r.deadline.map(|deadline| (r.id, deadline)))
    }

    /// Remove every pending request (shutdown or permanent failure).
    pub(crate) fn drain_all(&mut self) -> Vec<PendingRequest<Req, Resp>> {
        self.items.drain(..).collect()
    }
}
