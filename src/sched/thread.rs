//! Thread control blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spin::Mutex;

pub type ThreadRef = Arc<Mutex<Thread>>;

pub const MAX_PRIORITY: u32 = 149;

/// Sentinel at the far end of a thread's stack; if it gets clobbered
/// the thread ran off the end.
const STACK_FENCEPOST: u32 = 0xDEAD_BEEF;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_tid() -> u64 {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    JustCreated,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// The ready queue a priority falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    L1,
    L2,
    L3,
}

impl Band {
    pub fn of(priority: u32) -> Band {
        match priority {
            100..=MAX_PRIORITY => Band::L1,
            50..=99 => Band::L2,
            _ => Band::L3,
        }
    }

    /// Queue number as it appears in trace lines.
    pub fn index(self) -> usize {
        match self {
            Band::L1 => 1,
            Band::L2 => 2,
            Band::L3 => 3,
        }
    }
}

/// Placeholder for a user program's address space. The trap shell owns
/// the real one; the scheduler only needs the save/restore points
/// around a context switch.
pub struct AddressSpace;

impl AddressSpace {
    pub fn save_state(&self) {
        log::trace!(target: "sched", "saving user address-space state");
    }

    pub fn restore_state(&self) {
        log::trace!(target: "sched", "restoring user address-space state");
    }
}

pub struct Thread {
    pub id: u64,
    pub name: String,
    pub status: ThreadStatus,
    /// Scheduling priority in [0, 149]; only ever raised after creation.
    pub priority: u32,
    /// Ticks spent on a ready list since the last promotion credit.
    pub aging_count: u64,
    /// Tick at which the thread most recently entered Ready.
    pub came_ready: u64,
    /// Exponentially weighted estimate of the next CPU burst.
    pub predict: u64,
    /// Duration of the most recent completed burst.
    pub last_time: u64,
    /// Total ticks executed on the CPU.
    pub accum_exec: u64,
    pub space: Option<AddressSpace>,
    stack_sentinel: u32,
}

impl Thread {
    pub fn new(name: &str, priority: u32) -> ThreadRef {
        assert!(priority <= MAX_PRIORITY, "priority {priority} out of range");
        Arc::new(Mutex::new(Self {
            id: alloc_tid(),
            name: name.to_string(),
            status: ThreadStatus::JustCreated,
            priority,
            aging_count: 0,
            came_ready: 0,
            predict: 0,
            last_time: 0,
            accum_exec: 0,
            space: None,
            stack_sentinel: STACK_FENCEPOST,
        }))
    }

    pub fn band(&self) -> Band {
        Band::of(self.priority)
    }

    /// Key L1 is ordered by: shortest expected next burst first.
    /// Truncating halves, matching the observable dispatch order.
    pub fn sjf_key(&self) -> u64 {
        self.predict / 2 + self.last_time / 2
    }

    /// Record a completed CPU burst: remember it, fold it into the
    /// burst estimate, and account the executed ticks.
    pub fn finish_burst(&mut self, burst: u64) {
        self.last_time = burst;
        self.predict = burst / 2 + self.predict / 2;
        self.accum_exec += burst;
    }

    pub fn check_overflow(&self) {
        assert_eq!(
            self.stack_sentinel, STACK_FENCEPOST,
            "thread {} overflowed its stack",
            self.name
        );
    }

    pub fn save_user_state(&self) {
        if let Some(space) = &self.space {
            space.save_state();
        }
    }

    pub fn restore_user_state(&self) {
        if let Some(space) = &self.space {
            space.restore_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_match_priority_ranges() {
        assert_eq!(Band::of(0), Band::L3);
        assert_eq!(Band::of(49), Band::L3);
        assert_eq!(Band::of(50), Band::L2);
        assert_eq!(Band::of(99), Band::L2);
        assert_eq!(Band::of(100), Band::L1);
        assert_eq!(Band::of(149), Band::L1);
    }

    #[test]
    fn sjf_key_uses_truncating_halves() {
        let t = Thread::new("t", 120);
        let mut g = t.lock();
        g.predict = 7;
        g.last_time = 5;
        // 7/2 + 5/2 = 3 + 2, not (7 + 5)/2.
        assert_eq!(g.sjf_key(), 5);
    }

    #[test]
    fn finish_burst_folds_into_estimate() {
        let t = Thread::new("t", 120);
        let mut g = t.lock();
        g.predict = 10;
        g.finish_burst(6);
        assert_eq!(g.last_time, 6);
        assert_eq!(g.predict, 8);
        assert_eq!(g.accum_exec, 6);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn priority_above_cap_is_rejected() {
        let _ = Thread::new("t", 150);
    }
}
