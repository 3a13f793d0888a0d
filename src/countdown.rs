//! Single-shot resettable countdown timer.
//!
//! Drives v2 round timeouts: `reset` arms (or re-arms) the timer, `stop`
//! disarms it, and on expiry the callback runs exactly once for the schedule
//! that expired. A `reset` while armed replaces the pending firing, so a
//! superseded schedule never calls back.

use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Callback invoked with the firing time when the countdown expires
pub type OnTimeoutFn = Arc<dyn Fn(Instant) + Send + Sync>;

#[derive(Debug, Default)]
struct TimerState {
    /// Bumped on every reset/stop; a waiter only fires if its generation is
    /// still current
    generation: u64,
    armed: bool,
}

struct TimerInner {
    duration: Duration,
    state: Mutex<TimerState>,
    cond: Condvar,
    on_timeout: RwLock<Option<OnTimeoutFn>>,
}

/// Single-shot resettable countdown
pub struct CountdownTimer {
    inner: Arc<TimerInner>,
}

impl CountdownTimer {
    /// Create an unarmed countdown with the given duration
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                duration,
                state: Mutex::new(TimerState::default()),
                cond: Condvar::new(),
                on_timeout: RwLock::new(None),
            }),
        }
    }

    /// Install the expiry callback. Replaces any previous one.
    pub fn set_on_timeout(&self, callback: OnTimeoutFn) {
        *self.inner.on_timeout.write() = Some(callback);
    }

    /// Arm the countdown. If already armed, the pending firing is cancelled
    /// and the full duration starts over from now.
    pub fn reset(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.armed = true;
            self.inner.cond.notify_all();
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let deadline = Instant::now() + inner.duration;
            let mut state = inner.state.lock();
            loop {
                if state.generation != generation || !state.armed {
                    // Superseded by a newer reset or a stop
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    state.armed = false;
                    drop(state);
                    let callback = inner.on_timeout.read().clone();
                    if let Some(callback) = callback {
                        callback(Instant::now());
                    }
                    return;
                }
                inner.cond.wait_for(&mut state, deadline - now);
            }
        });
    }

    /// Disarm the countdown, cancelling any pending firing
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.armed = false;
        self.inner.cond.notify_all();
    }

    /// Whether a firing is currently pending
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }
}

impl std::fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownTimer")
            .field("duration", &self.inner.duration)
            .field("armed", &self.is_armed())
            .finish()
    }
}
