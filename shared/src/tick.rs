//! Fixed-rate pacing and the threads that run on it

use crate::error::NetError;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleeps away whatever is left of the current tick.
///
/// When a tick overruns, the missed deadlines are skipped rather than
/// replayed back to back.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time remaining until the next deadline
    pub fn remaining(&self) -> Duration {
        self.next.saturating_duration_since(Instant::now())
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
            self.next += self.interval;
        } else {
            self.next = now + self.interval;
        }
    }
}

/// An OS thread calling a closure once per tick until told to stop.
///
/// The running flag is checked before every tick; `stop` clears it and joins
/// the thread, so the closure never runs again once `stop` returns.
#[derive(Debug)]
pub struct TickThread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickThread {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self, NetError>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("{} thread started ({:?} ticks)", thread_name, interval);
                let mut ticker = Ticker::new(interval);
                while flag.load(Ordering::Acquire) {
                    tick();
                    ticker.wait();
                }
                debug!("{} thread stopped", thread_name);
            })?;

        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the running flag without waiting for the thread
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Signals and joins. Safe to call more than once.
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} thread panicked", self.name);
            }
        }
    }
}

impl Drop for TickThread {
    fn drop(&mut self) {
        self.stop();
    }
}
