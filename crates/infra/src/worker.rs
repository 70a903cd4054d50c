use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use globalcat_core::RegionCode;
use globalcat_events::{ChangeEvent, EventBus, RegionScoped, Subscription};
use globalcat_store::RegionalStore;

use crate::observer::ChangeObserver;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Upper bound on notifications handed to the observer at once.
    pub batch_size: usize,
    /// How long to wait for the first notification of a batch.
    pub tick: Duration,
    /// When set, notifications observed by other regions are ignored.
    pub region: Option<RegionCode>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            tick: Duration::from_millis(250),
            region: None,
        }
    }
}

/// Background loop feeding a change feed into a [`ChangeObserver`].
///
/// - Subscribes to the feed and collects notifications into batches
/// - Drives the async observer on the given runtime handle
/// - Gives the observer a heartbeat chance on idle ticks
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ObserverWorker;

impl ObserverWorker {
    /// Spawn the worker thread.
    ///
    /// `runtime` must belong to a multi-threaded runtime so store timeouts keep
    /// being driven while this thread blocks on the observer.
    pub fn spawn<B, S>(
        name: &'static str,
        feed: B,
        observer: Arc<ChangeObserver<S>>,
        runtime: Handle,
        options: WorkerOptions,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<ChangeEvent> + Send + Sync + 'static,
        S: RegionalStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<ChangeEvent> = feed.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &observer, &runtime, &options))?;

        info!(worker = name, "change observer worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S>(
    name: &'static str,
    sub: Subscription<ChangeEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    observer: &ChangeObserver<S>,
    runtime: &Handle,
    options: &WorkerOptions,
) where
    S: RegionalStore,
{
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let mut batch = match sub.recv_batch(options.batch_size.max(1), options.tick) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!(worker = name, "change feed disconnected");
                break;
            }
        };

        if let Some(region) = &options.region {
            batch.retain(|event| event.region() == region);
        }

        if batch.is_empty() {
            runtime.block_on(observer.heartbeat_if_due());
            continue;
        }

        let report = runtime.block_on(observer.handle_batch(batch));
        if report.failed > 0 {
            warn!(worker = name, failed = report.failed, "change batch had failures");
        } else {
            debug!(worker = name, ?report, "change batch handled");
        }
    }

    info!(worker = name, "change observer worker stopped");
}
