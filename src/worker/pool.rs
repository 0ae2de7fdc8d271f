//! Fixed pool of worker threads
//!
//! Each thread owns a current-thread tokio runtime and its own collaborators
//! and runs several [`TaskRunner`] loops on it. Threads share nothing but the
//! configuration and the shutdown token; the database arbitrates claims.

use crate::error::{Result, SpiderError};
use crate::worker::{TaskRunner, WorkerConfig, WorkerFactory};
use futures::future::join_all;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `workers` threads running `loops_per_worker` loops each.
    ///
    /// Returns once every thread has built its collaborators. If any thread
    /// fails to start, the others are stopped and the first error is returned.
    pub fn start(
        workers: usize,
        loops_per_worker: usize,
        config: WorkerConfig,
        factory: Arc<dyn WorkerFactory>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(workers);
        let (ready_tx, ready_rx) = mpsc::channel();

        for index in 0..workers {
            let config = config.clone();
            let factory = Arc::clone(&factory);
            let token = shutdown.clone();
            let ready = ready_tx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("tpl-worker-{}", index))
                .spawn(move || run_thread(index, loops_per_worker, config, factory, token, ready))
                .map_err(|e| {
                    SpiderError::IoError(format!("failed to spawn worker thread {}: {}", index, e))
                });

            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    abort(&shutdown, handles);
                    return Err(e);
                }
            }
        }
        drop(ready_tx);

        for _ in 0..workers {
            let failure = match ready_rx.recv() {
                Ok(Ok(())) => continue,
                Ok(Err(reason)) => reason,
                // Every sender gone before reporting: a thread died during startup
                Err(_) => "worker thread exited during startup".to_string(),
            };
            abort(&shutdown, handles);
            return Err(SpiderError::StartupError(failure));
        }

        info!(
            "Started {} workers x {} loops",
            workers, loops_per_worker
        );
        Ok(Self { handles, shutdown })
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal every loop to stop after its current step
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every worker thread to exit
    pub async fn join(self) {
        let handles = self.handles;
        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                if handle.join().is_err() {
                    error!("Worker thread {} panicked", name);
                }
            }
        })
        .await;

        if let Err(e) = joined {
            error!("Failed to join worker threads: {}", e);
        }
    }
}

/// Cancel and wait for threads that already started
fn abort(shutdown: &CancellationToken, handles: Vec<JoinHandle<()>>) {
    shutdown.cancel();
    for handle in handles {
        let _ = handle.join();
    }
}

fn run_thread(
    index: usize,
    loops: usize,
    config: WorkerConfig,
    factory: Arc<dyn WorkerFactory>,
    shutdown: CancellationToken,
    ready: Sender<std::result::Result<(), String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Worker {} failed to build runtime: {}", index, e);
            let _ = ready.send(Err(format!("worker {}: {}", index, e)));
            return;
        }
    };

    runtime.block_on(async move {
        let deps = match factory.build(index).await {
            Ok(deps) => deps,
            Err(e) => {
                error!("Worker {} failed to start: {}", index, e);
                let _ = ready.send(Err(format!("worker {}: {}", index, e)));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        drop(ready);

        let runners: Vec<TaskRunner> = (0..loops)
            .map(|slot| {
                TaskRunner::new(
                    deps.clone(),
                    config.with_worker_id(format!("w{}-{}", index, slot)),
                    shutdown.clone(),
                )
            })
            .collect();

        join_all(runners.iter().map(|runner| runner.run())).await;
    });

    info!("Worker thread {} exited", index);
}
