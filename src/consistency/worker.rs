//! Background resync worker.
//!
//! Drains resync requests queued by the coordinator when a mirror fails,
//! and periodically sweeps every degraded space so nothing queued before a
//! restart is forgotten.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::coordinator::ResyncRequest;
use crate::error::{RelationalError, SyncResult};

use super::Resynchronizer;

pub struct ResyncWorker {
    resync: Arc<Resynchronizer>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ResyncWorker {
    /// Start the worker and register it with the coordinator.
    pub fn spawn(resync: Arc<Resynchronizer>, interval: Duration) -> SyncResult<Self> {
        let (tx, rx) = mpsc::channel::<ResyncRequest>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let resync = Arc::clone(&resync);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("kgsync-resync".into())
                .spawn(move || run(&resync, &rx, &shutdown, interval))
                .map_err(|source| RelationalError::Io { source })?
        };
        resync.coordinator().set_resync_queue(Some(tx));
        tracing::info!(interval_secs = interval.as_secs(), "resync worker started");

        Ok(Self {
            resync,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for the current pass to finish.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Dropping the coordinator's sender disconnects the channel and
        // wakes the worker.
        self.resync.coordinator().set_resync_queue(None);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("resync worker panicked");
            }
        }
    }
}

fn run(
    resync: &Resynchronizer,
    rx: &mpsc::Receiver<ResyncRequest>,
    shutdown: &AtomicBool,
    interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(interval) {
            Ok(request) => {
                if let Err(e) = resync.resync_pending(&request.space) {
                    tracing::warn!(space = %request.space, error = %e, "queued resync failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => match resync.sweep() {
                Ok(0) => {}
                Ok(n) => tracing::info!(spaces = n, "sweep resynced degraded spaces"),
                Err(e) => tracing::warn!(error = %e, "resync sweep failed"),
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("resync worker stopped");
}

impl Drop for ResyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ResyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResyncWorker")
            .field("running", &self.is_running())
            .finish()
    }
}
