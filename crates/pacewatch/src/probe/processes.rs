//! Processes the probe has reported frames for, with last-seen times.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ObservedProcess {
    pub name: String,
    pub pid: u32,
    pub frames: u64,
    #[serde(skip)]
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<u32, ObservedProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ObservedProcess>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a frame from `(name, pid)`. A pid reused by another executable
    /// replaces the old entry.
    pub fn observe(&self, name: &str, pid: u32) {
        let now = Instant::now();
        let mut map = self.lock();
        match map.get_mut(&pid) {
            Some(p) if p.name == name => {
                p.frames += 1;
                p.last_seen = now;
            }
            _ => {
                debug!(process = name, pid, "new process observed");
                map.insert(
                    pid,
                    ObservedProcess {
                        name: name.to_string(),
                        pid,
                        frames: 1,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Name matching ignores ASCII case, as `find_by_name` does.
    pub fn contains(&self, name: &str, pid: u32) -> bool {
        self.stored_name(name, pid).is_some()
    }

    /// The name `pid` reports under, when it matches `name` ignoring case.
    pub fn stored_name(&self, name: &str, pid: u32) -> Option<String> {
        self.lock()
            .get(&pid)
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.name.clone())
    }

    /// First pid reporting under `name`, lowest pid wins.
    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        self.lock()
            .values()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.pid)
            .min()
    }

    pub fn pids(&self) -> std::collections::HashSet<u32> {
        self.lock().keys().copied().collect()
    }

    /// Sorted by name, then pid.
    pub fn list(&self) -> Vec<ObservedProcess> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.pid.cmp(&b.pid)));
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget processes silent for longer than `ttl`. Returns how many went.
    pub fn prune(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, p| now.duration_since(p.last_seen) <= ttl);
        let pruned = before - map.len();
        if pruned > 0 {
            debug!(pruned, "stale processes dropped");
        }
        pruned
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
