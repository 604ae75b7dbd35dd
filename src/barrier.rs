//! One-shot readiness gate between the light controller and everything that
//! consumes light state.
//!
//! The flag moves from unset to set exactly once per run. Threads block on a
//! condvar; tasks await a `watch` channel. Both observe the same flag, which
//! lives behind one mutex so `set`, `clear` and the wakers never disagree.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub use crate::DEFAULT_GRACE_PERIOD;

pub struct ActivationBarrier {
    flag: Mutex<bool>,
    cond: Condvar,
    tx: watch::Sender<bool>,
}

impl ActivationBarrier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Mutex::new(false),
            cond: Condvar::new(),
            tx,
        }
    }

    /// Release every current and future waiter.
    ///
    /// Returns `true` only for the call that actually flipped the flag;
    /// every later call is a no-op.
    pub fn set(&self) -> bool {
        let mut flag = self.flag.lock();
        if *flag {
            return false;
        }
        *flag = true;
        self.tx.send_replace(true);
        self.cond.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Reset to unset. Only valid before a run starts; clearing while agents
    /// are reading light state breaks the ordering guarantee.
    pub fn clear(&self) {
        let mut flag = self.flag.lock();
        *flag = false;
        self.tx.send_replace(false);
    }

    /// Block the calling thread until the flag is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
    }

    /// Block for at most `timeout`. Returns whether the flag is set.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        if *flag {
            return true;
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*flag {
                self.cond.wait(&mut flag);
            }
            return true;
        };
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                return *flag;
            }
        }
        true
    }

    /// Wait from an async task until the flag is set.
    pub async fn wait_async(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we
        // hold `&self`.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ActivationBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActivationBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationBarrier")
            .field("set", &self.is_set())
            .finish()
    }
}
