//! Per-working-directory reader/writer locks.
//!
//! Classification holds a shared lock; every mutating command holds an
//! exclusive lock on each path it touches. Multi-path acquisition is done in
//! sorted order so two writers can never wait on each other.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>>,
}

/// Exclusive guards for a set of paths; released together on drop.
#[derive(Debug)]
pub struct WriteGuards {
    paths: Vec<PathBuf>,
    _guards: Vec<OwnedRwLockWriteGuard<()>>,
}

impl WriteGuards {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &Path) -> Arc<RwLock<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        self.lock_for(&lock_key(path)).read_owned().await
    }

    pub async fn write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(&lock_key(path)).write_owned().await
    }

    pub async fn write_many<'a, I>(&self, paths: I) -> WriteGuards
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let keys: BTreeSet<PathBuf> = paths.into_iter().map(lock_key).collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock_for(key).write_owned().await);
        }
        WriteGuards {
            paths: keys.into_iter().collect(),
            _guards: guards,
        }
    }
}

/// Canonical form when the path exists, the path as given otherwise.
pub fn lock_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
