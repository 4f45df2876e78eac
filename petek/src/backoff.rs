//! Spin accounting and the stepped sleep schedule for contested updates.

use std::thread;
use std::time::{Duration, Instant};

use crate::metrics::SpinEpisode;

/// Sleep ladder for a writer spinning on a bucket claimed by another
/// writer. The sleep grows with the number of cooldowns already taken and
/// caps at the final rung.
#[derive(Clone, Debug)]
pub struct CooldownSchedule {
    rungs: Vec<(u32, Duration)>,
    ceiling: Duration,
}

impl CooldownSchedule {
    /// Schedule from explicit rungs: `(cooldowns_taken_up_to, sleep)`
    /// pairs, then `ceiling` for everything beyond the last rung.
    pub fn new(rungs: Vec<(u32, Duration)>, ceiling: Duration) -> Self {
        Self { rungs, ceiling }
    }

    fn sleep_for(&self, cooldowns: u32) -> Duration {
        for &(upper, sleep) in &self.rungs {
            if cooldowns <= upper {
                return sleep;
            }
        }
        self.ceiling
    }
}

impl Default for CooldownSchedule {
    fn default() -> Self {
        Self::new(
            vec![
                (30, Duration::from_millis(10)),
                (50, Duration::from_millis(20)),
                (70, Duration::from_millis(30)),
                (90, Duration::from_millis(50)),
            ],
            Duration::from_millis(60),
        )
    }
}

/// Tracks one spin episode inside a `set`: iteration count, cooldowns
/// taken, and wall time from the first contested observation.
pub(crate) struct SpinTracker<'a> {
    schedule: &'a CooldownSchedule,
    spin_per_sleep: u32,
    spins: u32,
    cooldowns: u32,
    started: Option<Instant>,
}

impl<'a> SpinTracker<'a> {
    pub(crate) fn new(schedule: &'a CooldownSchedule, spin_per_sleep: u32) -> Self {
        Self {
            schedule,
            spin_per_sleep,
            spins: 0,
            cooldowns: 0,
            started: None,
        }
    }

    /// One contested observation. Counting is split from sleeping so the
    /// caller can abort between the two without paying a sleep.
    pub(crate) fn note(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.spins += 1;
    }

    /// Sleep when the spin count crosses a `spin_per_sleep` boundary,
    /// yielding the core to the CAS winner.
    pub(crate) fn cooldown_if_due(&mut self) {
        if self.spins % self.spin_per_sleep == 0 {
            self.cooldowns += 1;
            thread::sleep(self.schedule.sleep_for(self.cooldowns));
        }
    }

    /// The episode record, or `None` if this attempt never spun.
    pub(crate) fn episode(&self, success: bool) -> Option<SpinEpisode> {
        self.started.map(|started| SpinEpisode {
            spins: self.spins,
            sleeps: self.cooldowns,
            elapsed: started.elapsed(),
            success,
        })
    }
}
