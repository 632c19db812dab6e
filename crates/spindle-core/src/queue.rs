//! FIFO queue of requests that have not been written yet.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::OutboundRequest;

#[derive(Debug)]
struct Queued {
    enqueued_at: Instant,
    sequence: u64,
    request: OutboundRequest,
}

impl Queued {
    fn key(&self) -> (Instant, u64) {
        (self.enqueued_at, self.sequence)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Reverse<Queued>>,
    next_sequence: u64,
}

/// Unbounded priority queue ordered by `(enqueue time, insertion order)`.
///
/// Admission control is the caller's job; the queue never refuses.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: OutboundRequest) {
        self.enqueue_at(request, Instant::now());
    }

    pub(crate) fn enqueue_at(&self, request: OutboundRequest, enqueued_at: Instant) {
        {
            let mut inner = self.lock();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.heap.push(Reverse(Queued {
                enqueued_at,
                sequence,
                request,
            }));
        }
        self.available.notify_one();
    }

    /// Remove the oldest request, waiting until one is available.
    pub async fn dequeue_one(&self) -> OutboundRequest {
        loop {
            let notified = self.available.notified();
            if let Some(request) = self.try_dequeue() {
                return request;
            }
            notified.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<OutboundRequest> {
        self.lock().heap.pop().map(|Reverse(queued)| queued.request)
    }

    /// Whether a request with `wire_id` is still waiting to be written.
    pub fn contains(&self, wire_id: u64) -> bool {
        self.lock()
            .heap
            .iter()
            .any(|Reverse(queued)| queued.request.wire_id == wire_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().heap.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
