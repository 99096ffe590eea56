//! Named background thread running a closure on a fixed interval.

use {
    crate::error::Result,
    log::{debug, warn},
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

/// A periodic task. Stopped and joined on drop.
pub(crate) struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Run `tick` immediately, then every `interval` until stopped.
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    tick();
                    let deadline = Instant::now() + interval;
                    while thread_running.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }
            })?;
        debug!("Started {name} worker");
        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for its current tick to finish.
    pub(crate) fn stop(&mut self) {
        self.running
            .store(false, Ordering::Release);
        if let Some(handle) = self
            .handle
            .take()
        {
            handle
                .thread()
                .unpark();
            if handle
                .join()
                .is_err()
            {
                warn!("{} worker panicked", self.name);
            }
            debug!("Stopped {} worker", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
