//! Phase Scheduler
//!
//! The host's single round timer: a tokio task ticking once per time unit for
//! the length of the round. Ticks are stamped with the arming generation so the
//! session can discard ticks that were already queued when the timer was
//! disarmed.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Generation of an armed timer.
pub type Generation = u64;

/// One elapsed time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTick {
    /// Timer that produced the tick.
    pub generation: Generation,
}

/// Owner of the (at most one) live round timer.
#[derive(Debug)]
pub struct PhaseScheduler {
    tick_interval: Duration,
    tick_tx: mpsc::Sender<SchedulerTick>,
    generation: Generation,
    task: Option<JoinHandle<()>>,
}

impl PhaseScheduler {
    /// Create a disarmed scheduler delivering ticks to `tick_tx`.
    pub fn new(tick_interval: Duration, tick_tx: mpsc::Sender<SchedulerTick>) -> Self {
        Self {
            tick_interval,
            tick_tx,
            generation: 0,
            task: None,
        }
    }

    /// Start a timer for `units` ticks, cancelling any live one first.
    pub fn arm(&mut self, units: u32) -> Generation {
        self.disarm();
        self.generation += 1;

        let generation = self.generation;
        let period = self.tick_interval;
        let tx = self.tick_tx.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for _ in 0..units {
                ticker.tick().await;
                if tx.send(SchedulerTick { generation }).await.is_err() {
                    break;
                }
            }
        }));

        debug!(generation, units, "Scheduler armed");
        generation
    }

    /// Stop the live timer. Ticks it already queued become stale.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(generation = self.generation, "Scheduler disarmed");
        }
        // Bumping here invalidates queued ticks even if the task had finished.
        self.generation += 1;
    }

    /// Whether `tick` belongs to the live timer.
    pub fn is_current(&self, tick: SchedulerTick) -> bool {
        self.task.is_some() && tick.generation == self.generation
    }

    /// Whether a timer is armed.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PhaseScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_unit_then_stops() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = PhaseScheduler::new(Duration::from_secs(1), tx);
        let generation = scheduler.arm(3);

        for _ in 0..3 {
            let tick = rx.recv().await.unwrap();
            assert_eq!(tick.generation, generation);
            assert!(scheduler.is_current(tick));
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = PhaseScheduler::new(Duration::from_secs(1), tx);
        let started = Instant::now();
        scheduler.arm(1);

        rx.recv().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_old_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = PhaseScheduler::new(Duration::from_secs(1), tx);

        let old = scheduler.arm(30);
        let stale = rx.recv().await.unwrap();
        assert_eq!(stale.generation, old);

        let new = scheduler.arm(30);
        assert_ne!(old, new);
        assert!(!scheduler.is_current(stale));

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.generation, new);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = PhaseScheduler::new(Duration::from_secs(1), tx);
        let generation = scheduler.arm(30);
        scheduler.disarm();

        assert!(!scheduler.is_armed());
        assert!(!scheduler.is_current(SchedulerTick { generation }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }
}
