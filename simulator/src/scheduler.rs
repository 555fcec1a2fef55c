use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Logical milliseconds; advances one tick per step and jumps forward to the
/// next timer when every task is asleep.
pub(crate) struct LogicalClock {
    pub(crate) now_ms: u64,
}

/// Picks which task acts next. Tasks either sit in `ready` or sleep on a timer.
pub(crate) struct Scheduler {
    ready: Vec<usize>,
    timers: BTreeMap<u64, Vec<usize>>,
    pub(crate) clock: LogicalClock,
}

impl Scheduler {
    pub(crate) fn new(task_count: usize) -> Self {
        Self {
            ready: (0..task_count).collect(),
            timers: BTreeMap::new(),
            clock: LogicalClock { now_ms: 0 },
        }
    }

    pub(crate) fn sleep(&mut self, task_id: usize, duration_ms: u64) {
        let wake_at = self.clock.now_ms.saturating_add(duration_ms.max(1));
        self.timers.entry(wake_at).or_default().push(task_id);
    }

    pub(crate) fn tick(&mut self) {
        self.clock.now_ms = self.clock.now_ms.saturating_add(1);
        self.wake_due();
    }

    pub(crate) fn next_ready(&mut self, rng: &mut ChaCha8Rng) -> Option<usize> {
        if self.ready.is_empty() {
            let (wake_at, mut tasks) = self.timers.pop_first()?;
            self.clock.now_ms = wake_at;
            self.ready.append(&mut tasks);
            self.wake_due();
        }
        let idx = rng.random_range(0..self.ready.len());
        Some(self.ready.swap_remove(idx))
    }

    pub(crate) fn mark_ready(&mut self, task_id: usize) {
        self.ready.push(task_id);
    }

    fn wake_due(&mut self) {
        while let Some(entry) = self.timers.first_entry() {
            if *entry.key() > self.clock.now_ms {
                break;
            }
            let mut tasks = entry.remove();
            self.ready.append(&mut tasks);
        }
    }
}
