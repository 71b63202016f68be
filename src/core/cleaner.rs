use crate::storage::ImageStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The cleaner's only state: when it last purged. Owned by the
/// cleaner task alone, never shared with session clocks.
#[derive(Debug)]
pub struct CleanerState {
    last_purge: Option<Instant>,
}

impl CleanerState {
    pub fn new() -> Self {
        Self { last_purge: None }
    }

    /// A purge is due when the interval has elapsed since this
    /// cleaner's own last purge (or immediately on the first check).
    pub fn purge_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_purge {
            Some(last) => now.duration_since(last) >= interval,
            None => true,
        }
    }

    pub fn mark_purged(&mut self, now: Instant) {
        self.last_purge = Some(now);
    }
}

impl Default for CleanerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Background loop that periodically empties the scratch namespace.
/// Skips a cycle while any login session holds a scratch lease.
pub struct ScratchCleaner {
    alive: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

const POLL_STEP: Duration = Duration::from_millis(250);

impl ScratchCleaner {
    pub fn spawn(store: ImageStore, interval: Duration) -> std::io::Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let worker_alive = Arc::clone(&alive);

        let worker = std::thread::Builder::new()
            .name("scratch-cleaner".into())
            .spawn(move || {
                let mut state = CleanerState::new();
                // First purge happens one full interval after spawn.
                state.mark_purged(Instant::now());

                while worker_alive.load(Ordering::SeqCst) {
                    std::thread::sleep(POLL_STEP);
                    if !state.purge_due(Instant::now(), interval) {
                        continue;
                    }
                    run_purge_cycle(&store, &mut state);
                }
            })?;

        Ok(Self { alive, worker })
    }

    pub fn shutdown(self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.worker.join();
    }
}

fn run_purge_cycle(store: &ImageStore, state: &mut CleanerState) {
    if store.scratch_in_use() {
        tracing::debug!("Skipping scratch purge: a login capture is in flight");
        return;
    }

    match store.purge_scratch() {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!("Purged {} scratch image(s)", removed);
            }
        }
        Err(e) => tracing::warn!("Scratch purge failed: {}", e),
    }
    state.mark_purged(Instant::now());
}
