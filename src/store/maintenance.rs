//! Snapshot upload and retention.
//!
//! [`StoreShared::maintain`] uploads the newest pending snapshot and then
//! purges remote versions outside the retention window. Failures never
//! propagate: the snapshot stays pending and the next run retries.

use std::{
    io,
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Sender};
use tracing::{debug, info, warn};

use super::StoreShared;
use crate::file_manager::{PurgeReport, SaveReport};

/// Outcome of one maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Snapshot uploaded by this run.
    pub uploaded: Option<SaveReport>,
    /// Result of the retention pass, when it succeeded.
    pub purged: Option<PurgeReport>,
    /// Steps that failed and were logged.
    pub failures: usize,
}

impl StoreShared {
    pub(super) fn maintain(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if self.closed.load(Ordering::Acquire) {
            return report;
        }
        let started = Instant::now();

        {
            // Held across the upload so a concurrent commit cannot delete
            // the directory being read.
            let mut pending = self.pending.lock();
            if let Some(snapshot) = pending.as_ref() {
                let version = snapshot.version;
                match self
                    .files
                    .save_checkpoint(&snapshot.dir, version, snapshot.num_keys)
                {
                    Ok(saved) => {
                        if let Some(done) = pending.take() {
                            self.remove_pending_dir(&done);
                        }
                        report.uploaded = Some(saved);
                    }
                    Err(e) => {
                        warn!(
                            store = %self.identity,
                            version,
                            "snapshot upload failed, will retry: {e}"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        match self.files.delete_old_versions(self.config.min_versions_to_retain) {
            Ok(purged) => report.purged = Some(purged),
            Err(e) => {
                warn!(store = %self.identity, "purging old versions failed: {e}");
                report.failures += 1;
            }
        }

        if let Some(saved) = &report.uploaded {
            info!(
                store = %self.identity,
                version = saved.version,
                files_uploaded = saved.files_uploaded,
                files_reused = saved.files_reused,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "snapshot uploaded"
            );
        }
        report
    }
}

// ------------------------------------------------------------------------------------------------
// Background thread
// ------------------------------------------------------------------------------------------------

/// Handle of a background maintenance thread.
///
/// Dropping the handle stops the thread and waits for the current run.
pub struct MaintenanceHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("maintenance thread panicked");
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(super) fn spawn(shared: Arc<StoreShared>, interval: Duration) -> io::Result<MaintenanceHandle> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let ticker = channel::tick(interval);
    let name = format!("maintenance-{}", shared.identity.store_name);

    let thread = thread::Builder::new().name(name).spawn(move || {
        debug!(store = %shared.identity, ?interval, "maintenance thread started");
        loop {
            channel::select! {
                recv(ticker) -> _ => {
                    if shared.closed.load(Ordering::Acquire) {
                        break;
                    }
                    shared.maintain();
                }
                recv(stop_rx) -> _ => break,
            }
        }
        debug!(store = %shared.identity, "maintenance thread stopped");
    })?;

    Ok(MaintenanceHandle {
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}
