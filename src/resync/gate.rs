use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::CloudEventsDataType;
use crate::EventSubResource;

/// Identifies resync responses that must not overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResyncKey {
    /// Hub or agent that asked
    pub peer: String,
    pub cluster_name: String,
    pub data_type: CloudEventsDataType,
    pub sub_resource: EventSubResource,
}

impl fmt::Display for ResyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}.{}",
            self.peer, self.cluster_name, self.data_type, self.sub_resource
        )
    }
}

/// Emitted once a resync response finished publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncCompleted {
    pub key: ResyncKey,
    /// Events published, tombstones included
    pub published: usize,
}

/// Coalesces resync requests per [`ResyncKey`].
///
/// While a response for a key is running, later requests for the same key
/// only replace the pending one; the newest pending request runs after the
/// current response finishes.
pub struct ResyncGate<T> {
    slots: Mutex<HashMap<ResyncKey, Option<T>>>,
}

impl<T> Default for ResyncGate<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> ResyncGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `request` when the caller should run it now, `None` when it
    /// was parked behind a running response.
    pub fn begin(&self, key: &ResyncKey, request: T) -> Option<T> {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(pending) => {
                *pending = Some(request);
                None
            }
            None => {
                slots.insert(key.clone(), None);
                Some(request)
            }
        }
    }

    /// Marks the running response for `key` as done. Returns the parked
    /// request to run next, keeping the key busy, or releases the key.
    pub fn finish(&self, key: &ResyncKey) -> Option<T> {
        let mut slots = self.slots.lock();
        match slots.get_mut(key).and_then(Option::take) {
            Some(next) => Some(next),
            None => {
                slots.remove(key);
                None
            }
        }
    }

    pub fn is_running(&self, key: &ResyncKey) -> bool {
        self.slots.lock().contains_key(key)
    }
}
