//! Thread dispatch.
//!
//! Chooses the next thread to run and switches to it. Every entry point
//! assumes interrupts are already disabled — on a uniprocessor that is
//! the mutual-exclusion token. Locks cannot be used here: waiting for a
//! busy lock would call back into `find_next_to_run` and loop forever.
//!
//! Three ready queues, selected by priority band: L1 (100–149) ordered
//! by shortest predicted burst, L2 (50–99) ordered by priority, L3
//! (0–49) round-robin FIFO. Waiting threads age upward through the
//! bands; they never move down.

use std::cmp::Ordering;
use std::sync::Arc;

use super::list::ThreadList;
use super::thread::{Band, Thread, ThreadRef, ThreadStatus, MAX_PRIORITY};
use crate::machine::{IntStatus, Machine};

/// Ready ticks that buy one promotion step.
pub const AGING_THRESHOLD: u64 = 1500;
/// Priority gained per promotion step.
pub const PROMOTE_STEP: u32 = 10;

pub fn sjf_compare(a: &Thread, b: &Thread) -> Ordering {
    a.sjf_key().cmp(&b.sjf_key())
}

pub fn priority_compare(a: &Thread, b: &Thread) -> Ordering {
    b.priority.cmp(&a.priority)
}

pub struct Scheduler {
    l1: ThreadList,
    l2: ThreadList,
    l3: ThreadList,
    current: Option<ThreadRef>,
    /// Tick at which the current thread was dispatched.
    coming_run: u64,
    /// Single-slot hand-off: a finishing thread parks itself here, and
    /// the successor reclaims it as its first post-switch action. The
    /// finishing thread cannot be released earlier — the switch still
    /// runs on its stack.
    to_be_destroyed: Option<ThreadRef>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            l1: ThreadList::sorted(sjf_compare),
            l2: ThreadList::sorted(priority_compare),
            l3: ThreadList::fifo(),
            current: None,
            coming_run: 0,
            to_be_destroyed: None,
        }
    }

    pub fn current(&self) -> Option<&ThreadRef> {
        self.current.as_ref()
    }

    pub fn coming_run(&self) -> u64 {
        self.coming_run
    }

    /// Install the boot thread as the running thread. Called once,
    /// before the first dispatch.
    pub fn start_running(&mut self, thread: ThreadRef) {
        assert!(self.current.is_none(), "a thread is already running");
        thread.lock().status = ThreadStatus::Running;
        self.current = Some(thread);
    }

    /// Mark a thread ready and queue it by its priority band.
    pub fn ready_to_run(&mut self, mach: &Machine, thread: ThreadRef) {
        assert!(
            mach.interrupt.is_off(),
            "ready_to_run with interrupts enabled"
        );
        let now = mach.stats.total_ticks;
        let band = {
            let mut g = thread.lock();
            log::debug!(target: "sched", "putting thread {} on the ready list", g.name);
            if g.status == ThreadStatus::JustCreated {
                g.aging_count = 0;
            }
            g.status = ThreadStatus::Ready;
            g.came_ready = now;
            let band = g.band();
            log::debug!(
                target: "sched",
                "[A] Tick [{}]: Thread [{}] is inserted into queue L[{}]",
                now,
                g.id,
                band.index()
            );
            band
        };
        match band {
            Band::L1 => self.l1.insert(thread),
            Band::L2 => self.l2.insert(thread),
            Band::L3 => self.l3.append(thread),
        }
    }

    /// Pop the head of the highest non-empty queue, or `None` if all
    /// are empty (the caller idles until an interrupt readies one).
    /// Round-robin preemption is armed only for L3 picks.
    pub fn find_next_to_run(&mut self, mach: &mut Machine) -> Option<ThreadRef> {
        assert!(
            mach.interrupt.is_off(),
            "find_next_to_run with interrupts enabled"
        );
        let now = mach.stats.total_ticks;
        let (next, level) = if !self.l1.is_empty() {
            mach.alarm.set_round_robin(false);
            (self.l1.remove_front().unwrap(), 1)
        } else if !self.l2.is_empty() {
            mach.alarm.set_round_robin(false);
            (self.l2.remove_front().unwrap(), 2)
        } else if !self.l3.is_empty() {
            mach.alarm.set_round_robin(true);
            (self.l3.remove_front().unwrap(), 3)
        } else {
            return None;
        };
        log::debug!(
            target: "sched",
            "[B] Tick [{}]: Thread [{}] is removed from queue L[{}]",
            now,
            next.lock().id,
            level
        );
        Some(next)
    }

    /// Dispatch the CPU to `next`. The previous thread's status must
    /// already have been changed by its caller to Ready, Blocked, or
    /// Finished. With `finishing` the previous thread is parked for
    /// deferred release.
    pub fn run(&mut self, mach: &mut Machine, next: ThreadRef, finishing: bool) {
        assert!(mach.interrupt.is_off(), "run with interrupts enabled");
        let old = self.current.clone().expect("run with no current thread");
        assert!(
            !Arc::ptr_eq(&old, &next),
            "dispatching the thread that is already running"
        );

        if finishing {
            assert!(
                self.to_be_destroyed.is_none(),
                "two threads finishing at once"
            );
            self.to_be_destroyed = Some(old.clone());
        }

        {
            let g = old.lock();
            g.save_user_state();
            g.check_overflow();
        }

        next.lock().status = ThreadStatus::Running;
        self.current = Some(next.clone());
        self.coming_run = mach.stats.total_ticks;

        {
            let new_g = next.lock();
            let old_g = old.lock();
            log::debug!(
                target: "sched",
                "switching from {} to {}",
                old_g.name,
                new_g.name
            );
            log::debug!(
                target: "sched",
                "[E] Tick [{}]: Thread [{}] is now selected for execution, thread [{}] is replaced, and it has executed [{}] ticks",
                mach.stats.total_ticks,
                new_g.id,
                old_g.id,
                old_g.accum_exec
            );
        }

        mach.context_switch();

        // We are "back": from here on the code runs as the resumed
        // thread's first actions after its own switch returns.
        assert!(mach.interrupt.is_off(), "interrupts came back on across a switch");
        self.check_to_be_destroyed();
        old.lock().restore_user_state();
    }

    /// Release a thread parked by a finishing predecessor.
    pub fn check_to_be_destroyed(&mut self) {
        if let Some(dead) = self.to_be_destroyed.take() {
            log::trace!(target: "sched", "reclaiming thread {}", dead.lock().name);
            drop(dead);
        }
    }

    /// Periodic promotion pass, L1 then L2 then L3. Each queue is
    /// snapshotted at the start of its own pass; promotion only moves a
    /// thread into a queue whose pass already finished, so every
    /// waiting thread is considered exactly once.
    pub fn aging(&mut self, mach: &Machine) {
        assert!(mach.interrupt.is_off(), "aging with interrupts enabled");
        let now = mach.stats.total_ticks;
        for band in [Band::L1, Band::L2, Band::L3] {
            self.aging_pass(band, now);
        }
    }

    fn aging_pass(&mut self, band: Band, now: u64) {
        let snapshot = self.list(band).snapshot();
        for thread in snapshot {
            if let Some(current) = &self.current {
                if Arc::ptr_eq(current, &thread) {
                    continue;
                }
            }
            let (id, before, after) = {
                let mut g = thread.lock();
                g.aging_count += now - g.came_ready;
                g.came_ready = now;
                let before = g.priority;
                while g.aging_count >= AGING_THRESHOLD && g.priority < MAX_PRIORITY {
                    g.aging_count -= AGING_THRESHOLD;
                    g.priority = (g.priority + PROMOTE_STEP).min(MAX_PRIORITY);
                }
                (g.id, before, g.priority)
            };
            if after == before {
                continue;
            }
            log::debug!(
                target: "sched",
                "[C] Tick [{}]: Thread [{}] changes its priority from [{}] to [{}]",
                now,
                id,
                before,
                after
            );
            // Re-insert on every promotion so sorted queues stay sorted;
            // a within-band move is not a queue transition and leaves no
            // [B]/[A] trace.
            let new_band = Band::of(after);
            self.list_mut(band).remove(&thread);
            if new_band != band {
                log::debug!(
                    target: "sched",
                    "[B] Tick [{}]: Thread [{}] is removed from queue L[{}]",
                    now,
                    id,
                    band.index()
                );
                log::debug!(
                    target: "sched",
                    "[A] Tick [{}]: Thread [{}] is inserted into queue L[{}]",
                    now,
                    id,
                    new_band.index()
                );
            }
            match new_band {
                Band::L1 => self.l1.insert(thread),
                Band::L2 => self.l2.insert(thread),
                Band::L3 => self.l3.append(thread),
            }
        }
    }

    /// Should the running thread give way right now? An L1 thread yields
    /// to a strictly shorter predicted burst; an L2 thread yields to any
    /// L1 arrival; L3 is handled by the round-robin quantum instead.
    pub fn preemptive(&self) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        let (band, predict) = {
            let g = current.lock();
            (g.band(), g.predict)
        };
        match band {
            Band::L1 => match self.l1.front() {
                Some(front) => front.lock().predict < predict,
                None => false,
            },
            Band::L2 => !self.l1.is_empty(),
            Band::L3 => false,
        }
    }

    /// Voluntarily give up the CPU: requeue the running thread and
    /// dispatch the best candidate, if there is one.
    pub fn yield_current(&mut self, mach: &mut Machine) {
        let old_level = mach.interrupt.set_level(IntStatus::Off);
        if let Some(next) = self.find_next_to_run(mach) {
            let current = self
                .current
                .clone()
                .expect("yield with no running thread");
            self.ready_to_run(mach, current);
            self.run(mach, next, false);
        }
        mach.interrupt.set_level(old_level);
    }

    /// Terminate the running thread. Its control block is released by
    /// the successor, which must exist.
    pub fn finish_current(&mut self, mach: &mut Machine) {
        mach.interrupt.set_level(IntStatus::Off);
        {
            let current = self.current.as_ref().expect("finish with no running thread");
            current.lock().status = ThreadStatus::Finished;
        }
        let next = self
            .find_next_to_run(mach)
            .expect("finishing with nothing left to run");
        self.run(mach, next, true);
    }

    fn list(&self, band: Band) -> &ThreadList {
        match band {
            Band::L1 => &self.l1,
            Band::L2 => &self.l2,
            Band::L3 => &self.l3,
        }
    }

    fn list_mut(&mut self, band: Band) -> &mut ThreadList {
        match band {
            Band::L1 => &mut self.l1,
            Band::L2 => &mut self.l2,
            Band::L3 => &mut self.l3,
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_lens(&self) -> (usize, usize, usize) {
        (self.l1.len(), self.l2.len(), self.l3.len())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::sched::thread::Thread;

    fn quiet_machine() -> Machine {
        let mut mach = Machine::new();
        mach.interrupt.set_level(IntStatus::Off);
        mach
    }

    #[test]
    fn ready_threads_land_in_their_band() {
        let mut mach = quiet_machine();
        let mut sched = Scheduler::new();
        sched.ready_to_run(&mach, Thread::new("hi", 120));
        sched.ready_to_run(&mach, Thread::new("mid", 70));
        sched.ready_to_run(&mach, Thread::new("lo", 10));
        assert_eq!(sched.queue_lens(), (1, 1, 1));

        // L1 before L2 before L3.
        let first = sched.find_next_to_run(&mut mach).unwrap();
        assert_eq!(first.lock().priority, 120);
        let second = sched.find_next_to_run(&mut mach).unwrap();
        assert_eq!(second.lock().priority, 70);
        let third = sched.find_next_to_run(&mut mach).unwrap();
        assert_eq!(third.lock().priority, 10);
        assert!(sched.find_next_to_run(&mut mach).is_none());
    }

    #[test]
    fn round_robin_follows_the_source_queue() {
        let mut mach = quiet_machine();
        let mut sched = Scheduler::new();
        sched.ready_to_run(&mach, Thread::new("hi", 120));
        sched.ready_to_run(&mach, Thread::new("lo", 10));

        sched.find_next_to_run(&mut mach).unwrap();
        assert!(!mach.alarm.round_robin());
        sched.find_next_to_run(&mut mach).unwrap();
        assert!(mach.alarm.round_robin());
    }

    #[test]
    fn just_created_threads_get_a_fresh_aging_count() {
        let mach = quiet_machine();
        let mut sched = Scheduler::new();
        let t = Thread::new("t", 10);
        t.lock().aging_count = 999;
        sched.ready_to_run(&mach, t.clone());
        assert_eq!(t.lock().aging_count, 0);
        assert_eq!(t.lock().status, ThreadStatus::Ready);
    }

    #[test]
    #[should_panic(expected = "interrupts enabled")]
    fn entry_points_require_interrupts_off() {
        let mach = Machine::new();
        let mut sched = Scheduler::new();
        sched.ready_to_run(&mach, Thread::new("t", 10));
    }

    #[test]
    fn within_band_promotion_keeps_l2_sorted() {
        let mut mach = quiet_machine();
        let mut sched = Scheduler::new();
        let senior = Thread::new("senior", 60);
        let junior = Thread::new("junior", 55);
        sched.ready_to_run(&mach, senior.clone());
        sched.ready_to_run(&mach, junior.clone());

        // Enough banked credit for two promotion steps.
        junior.lock().aging_count = 2 * AGING_THRESHOLD;
        sched.aging(&mach);
        assert_eq!(junior.lock().priority, 75);

        let first = sched.find_next_to_run(&mut mach).unwrap();
        assert!(Arc::ptr_eq(&first, &junior));
    }

    #[test]
    fn dispatch_parks_and_reclaims_a_finishing_thread() {
        let mut mach = quiet_machine();
        let mut sched = Scheduler::new();
        let main = Thread::new("main", 70);
        let other = Thread::new("other", 70);
        sched.start_running(main.clone());
        sched.ready_to_run(&mach, other.clone());

        sched.finish_current(&mut mach);
        assert_eq!(main.lock().status, ThreadStatus::Finished);
        assert_eq!(other.lock().status, ThreadStatus::Running);
        // The hand-off slot was drained by the successor.
        assert_eq!(Arc::strong_count(&main), 1);
    }

    #[test]
    fn yield_requeues_and_switches() {
        let mut mach = quiet_machine();
        let mut sched = Scheduler::new();
        let main = Thread::new("main", 70);
        let other = Thread::new("other", 90);
        sched.start_running(main.clone());
        sched.ready_to_run(&mach, other.clone());

        sched.yield_current(&mut mach);
        assert_eq!(other.lock().status, ThreadStatus::Running);
        assert_eq!(main.lock().status, ThreadStatus::Ready);
        // The old thread went back to L2.
        assert_eq!(sched.queue_lens(), (0, 1, 0));
    }
}
