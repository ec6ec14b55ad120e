//! Logical clock and timer queue.
//!
//! All playback advances through timers on one logical millisecond clock.
//! Timers due at the same instant fire in the order they were scheduled, so
//! a run driven by the same timestamped intents is reproducible.

use std::collections::BTreeMap;

/// Deferred engine work. Each variant carries the generation of the mode
/// that scheduled it; a mismatch on fire means the timer is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Play the next step of the running signature.
    SignatureStep { generation: u64 },
    /// Restore the pre-signature voice after the last step.
    SignatureFinish { generation: u64 },
    /// Advance the plain step sequencer.
    SequencerStep { generation: u64 },
    /// Move the signature sequencer to its next slot.
    SignatureSequencerStep { generation: u64 },
    /// Startup signature for Hum.
    StartupSignature { generation: u64 },
}

impl Timer {
    pub fn generation(&self) -> u64 {
        match *self {
            Timer::SignatureStep { generation }
            | Timer::SignatureFinish { generation }
            | Timer::SequencerStep { generation }
            | Timer::SignatureSequencerStep { generation }
            | Timer::StartupSignature { generation } => generation,
        }
    }
}

/// Handle returned by [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    due_ms: u64,
    seq: u64,
}

/// Timer queue ordered by `(due time, insertion order)`.
#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    now_ms: u64,
    next_seq: u64,
    pending: BTreeMap<TimerId, T>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            now_ms: 0,
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// Schedules `payload` to fire `delay_ms` after the current time.
    pub fn schedule(&mut self, delay_ms: u64, payload: T) -> TimerId {
        let id = TimerId {
            due_ms: self.now_ms.saturating_add(delay_ms),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.insert(id, payload);
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.pending.remove(&id)
    }

    /// Drops every pending timer matching `predicate`; returns how many were dropped.
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|_, payload| !predicate(payload));
        before - self.pending.len()
    }

    /// Pops the earliest timer due at or before `until_ms` and moves the clock
    /// to its due time.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<(u64, T)> {
        let entry = self.pending.first_entry()?;
        if entry.key().due_ms > until_ms {
            return None;
        }
        let due = entry.key().due_ms;
        let payload = entry.remove();
        self.now_ms = self.now_ms.max(due);
        Some((due, payload))
    }

    /// Moves the clock forward. Time never goes backwards.
    pub fn set_now(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn next_due(&self) -> Option<u64> {
        self.pending.keys().next().map(|id| id.due_ms)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
