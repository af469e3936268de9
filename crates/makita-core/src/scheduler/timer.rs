// Makita Timer Set
// Sleep deadlines for parked tasks, fired in deadline order with stable ties

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::task::TaskId;

/// One parked sleeper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepEntry {
    pub script: String,
    pub task: TaskId,
    pub deadline: Instant,
}

/// Flat set of sleep deadlines.
///
/// Entries are keyed by `(deadline, insertion sequence)`, so iteration order
/// is ascending deadline with ties broken by insertion order.
#[derive(Debug, Default)]
pub struct TimerSet {
    entries: BTreeMap<(Instant, u64), SleepEntry>,
    sequence: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, script: &str, task: TaskId, deadline: Instant) {
        self.sequence += 1;
        self.entries.insert(
            (deadline, self.sequence),
            SleepEntry {
                script: script.to_string(),
                task,
                deadline,
            },
        );
    }

    /// Remove and return every entry whose deadline is at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Vec<SleepEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// Remove the entry held by a task that is going away
    pub fn cancel_task(&mut self, task: TaskId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.task != task);
        before != self.entries.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Time left until the earliest deadline, zero if already due
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
