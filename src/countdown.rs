//! Pausable, skippable, cancelable one-second countdown.
//!
//! A [`Countdown`] owns a small tokio task that delivers `on_tick(remaining)`
//! once per second and `on_complete()` when the count reaches zero. The
//! handle controls it:
//!
//! - `pause()` stops tick delivery and keeps the remaining count.
//! - `resume()` continues from the paused value; the next tick is one full
//!   second after resuming.
//! - `skip()` fires `on_complete` immediately.
//! - `cancel()` stops without firing `on_complete`.
//!
//! Exactly one of running, completed, canceled holds at any time. Dropping
//! the handle cancels the countdown.
//!
//! Must be started from inside a tokio runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const TICK: Duration = Duration::from_secs(1);

type Completion = Box<dyn FnOnce() + Send>;

/// Lifecycle of a countdown. `Paused` counts as running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Paused,
    Completed,
    Canceled,
}

impl Phase {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

struct Inner {
    phase: Phase,
    remaining: u32,
    next_tick: Instant,
    on_complete: Option<Completion>,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Callbacks never run under this lock.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct Countdown {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn start<T, C>(seconds: u32, on_tick: T, on_complete: C) -> Self
    where
        T: FnMut(u32) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                phase: Phase::Running,
                remaining: seconds,
                next_tick: Instant::now() + TICK,
                on_complete: Some(Box::new(on_complete)),
            }),
            wake: Notify::new(),
        });
        let task = tokio::spawn(run(Arc::clone(&shared), on_tick));
        Self { shared, task }
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn remaining(&self) -> u32 {
        self.shared.lock().remaining
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    pub fn pause(&self) {
        let mut inner = self.shared.lock();
        if inner.phase == Phase::Running {
            inner.phase = Phase::Paused;
            drop(inner);
            self.shared.wake.notify_one();
        }
    }

    pub fn resume(&self) {
        let mut inner = self.shared.lock();
        if inner.phase == Phase::Paused {
            inner.phase = Phase::Running;
            inner.next_tick = Instant::now() + TICK;
            drop(inner);
            self.shared.wake.notify_one();
        }
    }

    /// Complete now. `on_complete` runs on the caller's stack.
    pub fn skip(&self) {
        let completion = {
            let mut inner = self.shared.lock();
            if !inner.phase.is_running() {
                return;
            }
            inner.phase = Phase::Completed;
            inner.remaining = 0;
            inner.on_complete.take()
        };
        self.shared.wake.notify_one();
        if let Some(complete) = completion {
            complete();
        }
    }

    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        if inner.phase.is_running() {
            inner.phase = Phase::Canceled;
            inner.on_complete = None;
            drop(inner);
            self.shared.wake.notify_one();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel();
        self.task.abort();
    }
}

impl std::fmt::Debug for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Countdown")
            .field("phase", &inner.phase)
            .field("remaining", &inner.remaining)
            .finish_non_exhaustive()
    }
}

async fn run<T>(shared: Arc<Shared>, mut on_tick: T)
where
    T: FnMut(u32) + Send + 'static,
{
    loop {
        let deadline = {
            let mut inner = shared.lock();
            let phase = inner.phase;
            match phase {
                Phase::Completed | Phase::Canceled => return,
                Phase::Paused => None,
                Phase::Running if inner.remaining == 0 => {
                    inner.phase = Phase::Completed;
                    let completion = inner.on_complete.take();
                    drop(inner);
                    if let Some(complete) = completion {
                        complete();
                    }
                    return;
                }
                Phase::Running => Some(inner.next_tick),
            }
        };

        let Some(deadline) = deadline else {
            shared.wake.notified().await;
            continue;
        };
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {}
            () = shared.wake.notified() => continue,
        }

        let (remaining, completion) = {
            let mut inner = shared.lock();
            if inner.phase != Phase::Running || Instant::now() < inner.next_tick {
                continue;
            }
            inner.remaining = inner.remaining.saturating_sub(1);
            inner.next_tick += TICK;
            let completion = if inner.remaining == 0 {
                inner.phase = Phase::Completed;
                inner.on_complete.take()
            } else {
                None
            };
            (inner.remaining, completion)
        };
        on_tick(remaining);
        if let Some(complete) = completion {
            complete();
            return;
        }
    }
}
