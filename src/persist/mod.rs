// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-08-29

//! Crash-safe octree persistence.
//!
//! A background worker snapshots the tree on a fixed interval. Each
//! save goes to a temporary file that is atomically renamed over the
//! canonical path, so the canonical path never holds a partial file.
//! Write failures are logged and retried next tick, never fatal.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::octree::codec::{encode_snapshot, FormatError};
use crate::octree::OctreeStore;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Load/save bookkeeping surfaced on the status page.
#[derive(Debug, Clone, Default)]
pub struct PersistStatus {
    pub loaded_at: Option<DateTime<Utc>>,
    pub load_duration: Option<Duration>,
    pub last_save_at: Option<DateTime<Utc>>,
    pub save_failures: u64,
}

impl PersistStatus {
    pub fn initial_load_complete(&self) -> bool {
        self.loaded_at.is_some()
    }
}

/// Background snapshot worker.
pub struct PersistManager {
    store: Arc<RwLock<OctreeStore>>,
    path: PathBuf,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    status: Arc<Mutex<PersistStatus>>,
}

impl PersistManager {
    pub fn new(
        store: Arc<RwLock<OctreeStore>>,
        path: PathBuf,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            path,
            interval,
            shutdown,
            status: Arc::new(Mutex::new(PersistStatus::default())),
        }
    }

    /// Shared status handle for the status layer.
    pub fn status_handle(&self) -> Arc<Mutex<PersistStatus>> {
        self.status.clone()
    }

    /// Report progress through an externally owned status handle.
    pub fn with_status(mut self, status: Arc<Mutex<PersistStatus>>) -> Self {
        self.status = status;
        self
    }

    /// Populate the store from the persisted snapshot. Any failure
    /// leaves the store empty; a missing file is the normal first run.
    pub fn load(&self) {
        let started = Instant::now();
        {
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            match store.load_from_file(&self.path) {
                Ok(()) => info!(
                    "loaded {} voxel(s) from {}",
                    store.counts().occupied,
                    self.path.display()
                ),
                Err(FormatError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    info!("no snapshot at {}; starting empty", self.path.display());
                }
                Err(e) => {
                    warn!(
                        "snapshot {} unusable ({e}); starting empty",
                        self.path.display()
                    );
                    *store = OctreeStore::new();
                }
            }
        }
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.loaded_at = Some(Utc::now());
        status.load_duration = Some(started.elapsed());
    }

    /// Spawn the interval worker. It performs a final save on shutdown;
    /// the server joins this handle last so that write completes before
    /// process exit.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(&self) {
        let mut last_tick = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(SHUTDOWN_POLL);
            if last_tick.elapsed() >= self.interval {
                last_tick = Instant::now();
                self.save_if_dirty();
            }
        }
        self.save_if_dirty();
        debug!("persist manager exiting");
    }

    /// Snapshot and persist when the store has unsaved changes.
    pub fn save_if_dirty(&self) {
        let (revision, bytes) = {
            let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
            if !store.has_unsaved_changes() {
                return;
            }
            (store.revision(), encode_snapshot(&store))
        };
        match self.write_atomic(&bytes) {
            Ok(()) => {
                self.store
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_saved(revision);
                let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
                status.last_save_at = Some(Utc::now());
                info!("persisted {} byte snapshot to {}", bytes.len(), self.path.display());
            }
            Err(e) => {
                let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
                status.save_failures += 1;
                warn!(
                    "snapshot write to {} failed ({e}); retrying next interval",
                    self.path.display()
                );
            }
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }
}
