//! FILENAME: core/sync-engine/src/debounce.rs
//! PURPOSE: Per-key trailing-edge debounce on tokio timers.
//! CONTEXT: Each `schedule` restarts the key's window. When a window
//! elapses quietly the key is delivered once on the fired channel, and the
//! consumer claims it with `accept`.
//!
//! Only a window that has not reached its deadline is superseded. A window
//! that already elapsed stays claimable even if the key is rescheduled
//! before the consumer gets to its `Fired`, so events spaced further apart
//! than the window always fire separately.

use std::hash::Hash;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A window that elapsed without being rescheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub key: K,
    generation: u64,
}

struct Pending {
    generation: u64,
    deadline: Instant,
    timer: JoinHandle<()>,
}

pub struct Debouncer<K> {
    window: Duration,
    pending: FxHashMap<K, Pending>,
    /// Generations whose window elapsed before the key was rescheduled.
    elapsed: FxHashSet<u64>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<Fired<K>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<Fired<K>>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer {
            window,
            pending: FxHashMap::default(),
            elapsed: FxHashSet::default(),
            next_generation: 0,
            fired_tx,
        };
        (debouncer, fired_rx)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)starts the window for `key`. Returns true if an earlier window
    /// for the key was still running and has been superseded.
    pub fn schedule(&mut self, key: K) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + self.window;

        let tx = self.fired_tx.clone();
        let fired = Fired {
            key: key.clone(),
            generation,
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(fired);
        });

        let next = Pending {
            generation,
            deadline,
            timer,
        };
        match self.pending.insert(key, next) {
            Some(previous) if previous.deadline > Instant::now() => {
                previous.timer.abort();
                true
            }
            Some(previous) => {
                self.elapsed.insert(previous.generation);
                false
            }
            None => false,
        }
    }

    /// Claims a fired window. False for a window that was superseded or cancelled.
    pub fn accept(&mut self, fired: &Fired<K>) -> bool {
        if self.elapsed.remove(&fired.generation) {
            return true;
        }
        match self.pending.get(&fired.key) {
            Some(pending) if pending.generation == fired.generation => {
                self.pending.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.timer.abort();
        }
        self.elapsed.clear();
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.timer.abort();
        }
    }
}
