//! Periodic timer callback.
//!
//! The hardware timer fires with interrupts off. Each firing runs the
//! aging pass and then decides whether the running thread should be
//! preempted: always by a better candidate per `Scheduler::preemptive`,
//! and additionally after a full quantum when the round-robin switch is
//! on (i.e. the running thread came from L3).

use crate::machine::{IntStatus, Machine};
use crate::sched::Scheduler;

/// Ticks an L3 thread may hold the CPU while round-robin is enabled.
pub const QUANTUM: u64 = 100;

pub struct Alarm {
    round_robin: bool,
}

impl Alarm {
    pub const fn new() -> Self {
        Self { round_robin: false }
    }

    pub fn set_round_robin(&mut self, on: bool) {
        self.round_robin = on;
    }

    pub fn round_robin(&self) -> bool {
        self.round_robin
    }
}

impl Default for Alarm {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer interrupt body. Runs with interrupts disabled; a reschedule is
/// requested through the interrupt gate rather than performed in place.
pub fn call_back(mach: &mut Machine, sched: &mut Scheduler) {
    let old_level = mach.interrupt.set_level(IntStatus::Off);

    sched.aging(mach);

    let quantum_expired = mach.alarm.round_robin()
        && mach.stats.total_ticks.saturating_sub(sched.coming_run()) >= QUANTUM;
    if sched.current().is_some() && (sched.preemptive() || quantum_expired) {
        mach.interrupt.yield_on_return();
    }

    mach.interrupt.set_level(old_level);
}
