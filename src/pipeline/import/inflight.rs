use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Filenames currently being ingested. Process-lifetime only.
#[derive(Clone, Default)]
pub struct InFlightSet {
    names: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `name`. `None` when another task holds it.
    pub fn try_claim(&self, name: &str) -> Option<InFlightGuard> {
        if !lock(&self.names).insert(name.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            names: Arc::clone(&self.names),
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.names).contains(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.names).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its claim on drop, on every exit path.
#[derive(Debug)]
pub struct InFlightGuard {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl InFlightGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.names).remove(&self.name);
    }
}

// A panic while holding the lock cannot leave the set half-updated.
fn lock(names: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
