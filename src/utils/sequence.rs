use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;

/// Issues lexically ordered sequence ids: a zero padded millisecond timestamp
/// followed by a zero padded per-millisecond counter.
///
/// Ids issued by one generator are strictly increasing, including when the
/// wall clock steps backwards.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    state: Mutex<(u64, u64)>,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut state = self.state.lock();
        let (last_ms, counter) = *state;
        *state = if now > last_ms {
            (now, 0)
        } else {
            (last_ms, counter + 1)
        };
        format!("{:015}-{:010}", state.0, state.1)
    }
}

/// Orders two sequence ids; ids of different shapes compare by length first.
pub fn sequence_id_after(candidate: &str, current: &str) -> bool {
    (candidate.len(), candidate) > (current.len(), current)
}
