//! Keyed trailing-edge debounce.
//!
//! At most one timer is pending per key. Scheduling a key that already has
//! a pending timer cancels it and starts a new one, so a burst fires once,
//! one window after its last event.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

type FireFn<K> = Arc<dyn Fn(K) + Send + Sync>;

pub struct Debouncer<K> {
    window: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    next_generation: Mutex<u64>,
    on_fire: FireFn<K>,
}

impl<K> Debouncer<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(window: Duration, on_fire: impl Fn(K) + Send + Sync + 'static) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
            on_fire: Arc::new(on_fire),
        }
    }

    /// (Re)arm the timer for `key`.
    pub fn schedule(&self, key: K) {
        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };

        let pending = Arc::clone(&self.pending);
        let on_fire = Arc::clone(&self.on_fire);
        let window = self.window;
        let fire_key = key.clone();

        let mut map = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let current = {
                let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&fire_key) {
                    // A replaced timer may still wake up if the abort lost
                    // the race; only the latest generation fires.
                    Some(p) if p.generation == generation => {
                        map.remove(&fire_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                on_fire(fire_key);
            }
        });

        if let Some(previous) = map.insert(key, Pending { generation, task }) {
            previous.task.abort();
        }
    }

    /// Number of keys with a pending timer.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop every pending timer without firing.
    pub fn cancel_all(&self) {
        let mut map = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, p) in map.drain() {
            p.task.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut map = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, p) in map.drain() {
            p.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(window: Duration) -> (Debouncer<&'static str>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let debouncer = Debouncer::new(window, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (debouncer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let (debouncer, fired) = counting(Duration::from_millis(300));
        for _ in 0..10 {
            debouncer.schedule("project");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (debouncer, fired) = counting(Duration::from_millis(300));
        debouncer.schedule("project");
        debouncer.schedule("service");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (debouncer, fired) = counting(Duration::from_millis(300));
        debouncer.schedule("project");
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.schedule("project");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (debouncer, fired) = counting(Duration::from_millis(300));
        debouncer.schedule("project");
        debouncer.cancel_all();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
