//! Per-key in-flight markers so identical concurrent requests generate once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::cache::CacheKey;

#[derive(Debug, Default)]
pub struct InFlight {
    slots: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a request for `key` is generating. Dropping it frees the slot.
pub struct FlightGuard<'a> {
    owner: &'a InFlight,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request for `key` is generating, then claim it.
    pub async fn acquire(&self, key: &CacheKey) -> FlightGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            sweep(&mut slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        FlightGuard {
            owner: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a claimed or contended slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock();
        drop(self.guard.take());
        sweep(&mut slots);
    }
}

/// Drop slots whose only reference is the map's: nobody holds or waits on
/// them. This also clears slots left by waiters cancelled after a release.
fn sweep(slots: &mut HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>) {
    slots.retain(|_, slot| Arc::strong_count(slot) > 1);
}
