//! Local vote timers. All of them are advisory: they schedule status checks and
//! drive countdown displays, but never decide that a vote is over.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::VoteTiming;

/// Seconds left, rounded up so a display never shows 0 before the deadline
pub fn whole_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000)
}

/// A repeating schedule that stops at a deadline. The deadline itself is always
/// the final firing.
#[derive(Debug, Clone, PartialEq)]
struct Schedule {
    every: Duration,
    deadline: Instant,
    next: Option<Instant>,
}

impl Schedule {
    fn new(start: Instant, every: Duration, deadline: Instant) -> Self {
        let next = if every.is_zero() {
            deadline
        } else {
            (start + every).min(deadline)
        };
        Self {
            every,
            deadline,
            next: Some(next),
        }
    }

    /// Consume the firing due at `now`, if any, and schedule the next one
    fn take(&mut self, now: Instant) -> bool {
        let Some(at) = self.next else {
            return false;
        };
        if now < at {
            return false;
        }

        if at >= self.deadline {
            self.next = None;
        } else {
            let mut next = at + self.every;
            while next <= now && next < self.deadline && !self.every.is_zero() {
                next += self.every;
            }
            self.next = Some(next.min(self.deadline));
        }
        true
    }
}

/// Voting countdown with its status-check and display schedules
#[derive(Debug, Clone, PartialEq)]
pub struct Countdown {
    deadline: Instant,
    warning_below: Duration,
    checks: Schedule,
    display: Schedule,
}

impl Countdown {
    pub fn start(now: Instant, timing: &VoteTiming) -> Self {
        let deadline = now + timing.countdown;
        Self {
            deadline,
            warning_below: timing.warning_below,
            checks: Schedule::new(now, timing.status_check_every, deadline),
            display: Schedule::new(now, timing.display_tick, deadline),
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn remaining_secs(&self, now: Instant) -> u64 {
        whole_secs(self.remaining(now))
    }

    pub fn is_warning(&self, now: Instant) -> bool {
        self.remaining(now) <= self.warning_below
    }

    /// True when a vote status check is due
    pub fn take_check(&mut self, now: Instant) -> bool {
        self.checks.take(now)
    }

    /// True when the displayed seconds should be refreshed
    pub fn take_display(&mut self, now: Instant) -> bool {
        self.display.take(now)
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.checks.next, self.display.next) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Fixed-length results display with a per-second countdown
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTimer {
    until: Instant,
    total: Duration,
    display: Schedule,
}

impl ResultsTimer {
    pub fn start(now: Instant, timing: &VoteTiming) -> Self {
        let until = now + timing.results;
        Self {
            until,
            total: timing.results,
            display: Schedule::new(now, timing.display_tick, until),
        }
    }

    pub fn remaining_secs(&self, now: Instant) -> u64 {
        whole_secs(self.until.saturating_duration_since(now))
    }

    pub fn total_secs(&self) -> u64 {
        whole_secs(self.total)
    }

    pub fn take_display(&mut self, now: Instant) -> bool {
        self.display.take(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.until
    }

    pub fn next_wakeup(&self) -> Instant {
        self.display.next.unwrap_or(self.until).min(self.until)
    }
}
