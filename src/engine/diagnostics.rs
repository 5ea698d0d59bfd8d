//! Trailing attempt logs for operator diagnostics.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::model::{GenerationAttempt, RequestId};

/// The attempt logs of the most recent finished requests.
///
/// Bounded: once `capacity` requests are held, the oldest is dropped.
#[derive(Debug)]
pub struct AttemptLogBook {
    capacity: usize,
    entries: Mutex<VecDeque<(RequestId, Vec<GenerationAttempt>)>>,
}

impl AttemptLogBook {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, request_id: RequestId, attempts: Vec<GenerationAttempt>) {
        let mut entries = self.entries.lock();
        entries.retain(|(id, _)| *id != request_id);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((request_id, attempts));
    }

    /// Empty when the request is unknown or has aged out.
    pub fn get(&self, request_id: &RequestId) -> Vec<GenerationAttempt> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == request_id)
            .map(|(_, attempts)| attempts.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
