//! Wait countdown
//!
//! A single-shot countdown that reports ticks and one expiry to its owner
//! through a channel. Every start gets a new generation number; the owner
//! passes expiries through [`WaitCountdown::accept_expiry`], which rejects
//! anything from a canceled or superseded run. Together with aborting the
//! task on cancel, this keeps a canceled countdown from ever firing.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Message sent by a running countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    Tick { generation: u64, remaining: Duration },
    Expired { generation: u64 },
}

/// Cancellable countdown owned by a call session
#[derive(Debug)]
pub struct WaitCountdown<T> {
    tick: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: mpsc::Sender<T>,
}

impl<T> WaitCountdown<T>
where
    T: From<CountdownEvent> + Send + 'static,
{
    pub fn new(tick: Duration, tx: mpsc::Sender<T>) -> Self {
        Self {
            tick,
            generation: 0,
            task: None,
            tx,
        }
    }

    /// Start counting down to `deadline`, replacing any running countdown
    pub fn start(&mut self, deadline: Instant) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let tick = self.tick;
        let tx = self.tx.clone();

        debug!(generation, "Starting wait countdown");
        self.task = Some(tokio::spawn(async move {
            let expiry = tokio::time::sleep_until(deadline);
            tokio::pin!(expiry);
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut expiry => {
                        let _ = tx.send(CountdownEvent::Expired { generation }.into()).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        trace!(generation, remaining_ms = remaining.as_millis() as u64, "Countdown tick");
                        if tx.send(CountdownEvent::Tick { generation, remaining }.into()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
        generation
    }

    /// Stop the countdown; returns false if none was running
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                debug!(generation = self.generation, "Wait countdown canceled");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Whether a tick belongs to the running countdown
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }

    /// Claim an expiry; true exactly once for the running countdown
    pub fn accept_expiry(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.task = None;
            true
        } else {
            debug!(generation, current = self.generation, "Discarding stale countdown expiry");
            false
        }
    }
}

impl<T> Drop for WaitCountdown<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
