//! Keepalive watchdog.
//!
//! Armed with the session's keepalive timeout plus a safety margin. Every arm
//! bumps a generation counter; a deadline that fires with an outdated
//! generation was superseded and is dropped. Cancelling the scheduled task is
//! only an optimization, the counter decides.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::scheduler::{ScheduledTask, Scheduler};

/// Invoked once per expired deadline with the generation that armed it.
pub type TimeoutCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct MonitorState {
    generation: u64,
    /// `Some` while running.
    timeout: Option<Duration>,
    scheduled: Option<ScheduledTask>,
}

pub struct KeepaliveMonitor {
    scheduler: Arc<Scheduler>,
    margin: Duration,
    on_timeout: TimeoutCallback,
    state: Arc<Mutex<MonitorState>>,
}

impl KeepaliveMonitor {
    pub fn new(scheduler: Arc<Scheduler>, margin: Duration, on_timeout: TimeoutCallback) -> Self {
        Self {
            scheduler,
            margin,
            on_timeout,
            state: Arc::new(Mutex::new(MonitorState::default())),
        }
    }

    /// Arm (or re-arm) for `timeout + margin`.
    pub fn start(&self, timeout: Duration) {
        let mut state = self.state.lock();
        state.timeout = Some(timeout);
        self.arm(&mut state, timeout);
    }

    /// Push the deadline out using the timeout given to `start`. No-op while stopped.
    pub fn on_keepalive(&self) {
        let mut state = self.state.lock();
        if let Some(timeout) = state.timeout {
            self.arm(&mut state, timeout);
        }
    }

    /// Disarm unconditionally.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.timeout = None;
        if let Some(task) = state.scheduled.take() {
            task.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().timeout.is_some()
    }

    /// Whether `generation` is still the armed deadline. A timeout queued
    /// before a later re-arm or stop reports `false`.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.timeout.is_some() && state.generation == generation
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Timeout given to the last `start`, while running.
    pub fn current_timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    fn arm(&self, state: &mut MonitorState, timeout: Duration) {
        state.generation += 1;
        let generation = state.generation;
        if let Some(task) = state.scheduled.take() {
            task.cancel();
        }

        let deadline = timeout + self.margin;
        let shared = Arc::clone(&self.state);
        let on_timeout = Arc::clone(&self.on_timeout);

        state.scheduled = self.scheduler.schedule(deadline, move || {
            {
                let mut current = shared.lock();
                if current.generation != generation {
                    debug!("stale keepalive deadline (generation {}) ignored", generation);
                    return;
                }
                current.scheduled = None;
            }
            warn!("no keepalive within {:?}, connection presumed dead", deadline);
            on_timeout(generation);
        });

        if state.scheduled.is_none() {
            debug!("keepalive not armed: scheduler is shut down");
        }
    }
}
