//! Wire ID → in-flight request table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::error::SessionError;
use crate::protocol::OutboundRequest;

#[derive(Debug)]
struct InFlight {
    request: OutboundRequest,
    sent_at: Instant,
}

/// Requests written to the wire and still waiting for their response.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, InFlight>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request` under `wire_id`. IDs must be unique among in-flight
    /// requests; a clash is a caller bug and is refused.
    pub fn record(&self, wire_id: u64, request: OutboundRequest) -> Result<(), SessionError> {
        match self.lock().entry(wire_id) {
            Entry::Occupied(_) => Err(SessionError::DuplicateWireId(wire_id)),
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    request,
                    sent_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Remove and return the request for `wire_id`; `None` for an unknown ID.
    pub fn retire(&self, wire_id: u64) -> Option<OutboundRequest> {
        self.lock().remove(&wire_id).map(|entry| entry.request)
    }

    pub fn contains(&self, wire_id: u64) -> bool {
        self.lock().contains_key(&wire_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// When the longest-waiting request was recorded.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.lock().values().map(|entry| entry.sent_at).min()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, InFlight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
