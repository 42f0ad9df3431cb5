use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shutdown is the session-wide, one-way stop flag. Every loop holds a clone
/// and polls it; any of them (or the Ctrl-C handler) may request shutdown.
/// Once requested it is never cleared.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown::default()
    }

    /// Requests shutdown. Returns true only for the call that actually moved
    /// the flag from running to stopping, which lets callers log the trigger
    /// once.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleeps for up to `total`, waking every `poll` to check the flag.
    /// Returns true if shutdown was observed before the full wait elapsed.
    pub fn wait(&self, total: Duration, poll: Duration) -> bool {
        // A `total` too large to represent as an Instant just means we wait
        // until shutdown.
        let deadline = Instant::now().checked_add(total);
        loop {
            if self.is_requested() {
                return true;
            }
            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    std::cmp::min(poll, deadline - now)
                }
                None => poll,
            };
            std::thread::sleep(nap);
        }
    }
}
