use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Entries = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async lock per container name, created on demand.
#[derive(Default, Clone)]
pub struct NameLocks {
    entries: Entries,
}

/// Held for the duration of one deployment of `name`.
pub struct NameGuard {
    name: String,
    entries: Entries,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other deployment holds `name`.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let lock = {
            let mut entries = self.entries.lock();
            entries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        NameGuard {
            name: name.to_string(),
            entries: self.entries.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        // Waiters clone the entry under this map lock, so two references
        // (the map and our guard) means nobody is queued.
        let idle = entries
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 2);
        if idle {
            entries.remove(&self.name);
        }
        self.guard.take();
    }
}
