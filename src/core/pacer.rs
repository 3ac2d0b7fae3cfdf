//! Deadline-based pacing clock for the processing thread.
//!
//! Deadlines advance by a fixed interval from the previous deadline, not from
//! the time the tick was handled, so timing error does not accumulate. When the
//! thread falls more than `MAX_LAG_TICKS` intervals behind, the clock resyncs to
//! "now" instead of firing a burst of catch-up ticks.
//!
//! The clock itself never sleeps: the processing thread blocks on its wake
//! channel with `time_until()` as the timeout and calls `on_tick()` when the
//! wait times out past the deadline.

use std::time::{Duration, Instant};

use log::{debug, trace};

const MAX_LAG_TICKS: u32 = 4;

#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next_deadline: Option<Instant>,
    ticks: u64,
    resyncs: u64,
}

pub fn interval_for(fps: f32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(f32::MIN_POSITIVE) as f64)
}

impl Pacer {
    pub fn new(fps: f32) -> Self {
        Self {
            interval: interval_for(fps),
            next_deadline: None,
            ticks: 0,
            resyncs: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.next_deadline.is_some()
    }

    /// Arm the clock; the first tick is due immediately.
    pub fn start(&mut self, now: Instant) {
        if self.next_deadline.is_none() {
            self.next_deadline = Some(now);
            trace!("Pacer started, interval {:?}", self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.next_deadline = None;
    }

    /// Change rate. Takes effect from the next deadline on.
    pub fn set_fps(&mut self, fps: f32) {
        let interval = interval_for(fps);
        if interval == self.interval {
            return;
        }
        if let Some(deadline) = self.next_deadline {
            // Re-derive the pending deadline from the last tick under the new interval
            let last = deadline.checked_sub(self.interval).unwrap_or(deadline);
            self.next_deadline = Some(last + interval);
        }
        debug!("Pacer interval {:?} -> {:?}", self.interval, interval);
        self.interval = interval;
    }

    /// Time left until the next deadline (zero if due). `None` when stopped.
    pub fn time_until(&self, now: Instant) -> Option<Duration> {
        self.next_deadline.map(|d| d.saturating_duration_since(now))
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_deadline.is_some_and(|d| now >= d)
    }

    /// Consume the due deadline and schedule the next one.
    pub fn on_tick(&mut self, now: Instant) {
        let Some(deadline) = self.next_deadline else {
            return;
        };
        self.ticks += 1;
        let next = deadline + self.interval;
        if now > next + self.interval * MAX_LAG_TICKS {
            self.resyncs += 1;
            debug!("Pacer lagging {:?}, resyncing", now - deadline);
            self.next_deadline = Some(now + self.interval);
        } else {
            self.next_deadline = Some(next);
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{RecvTimeoutError, bounded};

    #[test]
    fn test_deadlines_do_not_drift() {
        let t0 = Instant::now();
        let mut p = Pacer::new(10.0);
        p.start(t0);
        assert!(p.is_due(t0));

        // Handle every tick 30ms late: the schedule stays on the 100ms grid
        for i in 0..5u32 {
            let now = t0 + Duration::from_millis(100) * i + Duration::from_millis(30);
            p.on_tick(now);
        }
        assert_eq!(p.time_until(t0 + Duration::from_millis(430)), Some(Duration::from_millis(70)));
        assert_eq!(p.resyncs(), 0);
    }

    #[test]
    fn test_resync_after_long_stall() {
        let t0 = Instant::now();
        let mut p = Pacer::new(100.0);
        p.start(t0);
        let late = t0 + Duration::from_secs(1);
        p.on_tick(late);
        assert_eq!(p.resyncs(), 1);
        assert_eq!(p.time_until(late), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_set_fps_reschedules_pending_deadline() {
        let t0 = Instant::now();
        let mut p = Pacer::new(10.0);
        p.start(t0);
        p.on_tick(t0);
        p.set_fps(20.0);
        assert_eq!(p.interval(), Duration::from_millis(50));
        assert_eq!(p.time_until(t0), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_stopped_pacer_never_due() {
        let mut p = Pacer::new(30.0);
        assert_eq!(p.time_until(Instant::now()), None);
        p.start(Instant::now());
        p.stop();
        assert!(!p.is_due(Instant::now()));
    }

    #[test]
    fn test_tick_count_over_window() {
        // 40 FPS for 500ms -> 20 ticks, waiting on a channel like the processing thread does
        let (_tx, rx) = bounded::<()>(1);
        let mut p = Pacer::new(40.0);
        let start = Instant::now();
        let end = start + Duration::from_millis(500);
        p.start(start);

        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            let wait = p.time_until(now).unwrap_or_default().min(end - now);
            match rx.recv_timeout(wait) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if now < end && p.is_due(now) {
                        p.on_tick(now);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let ticks = p.ticks() as i64;
        assert!((ticks - 20).abs() <= 1, "ticks = {}", ticks);
    }
}
