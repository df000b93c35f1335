//! The worker pop/process loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{DsqError, DsqResult};
use crate::manager::Manager;
use crate::task::TaskEnvelope;

/// Tunables for [`Worker::run`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Seconds the worker runs before exiting to be restarted by a
    /// supervisor; jittered up by 0-10% at construction. `None` runs
    /// forever (or until `burst` drains the queues).
    pub lifetime: Option<u64>,
    /// Default per-task execution deadline, overridden by a task's own
    /// `timeout` field.
    pub task_timeout: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lifetime: None,
            task_timeout: None,
        }
    }
}

/// Pops and processes tasks from a fixed set of queues until told to stop.
pub struct Worker {
    manager: Arc<Manager>,
    lifetime: Option<u64>,
    task_timeout: Option<u64>,
    current_task: Mutex<Option<TaskEnvelope>>,
}

impl Worker {
    pub fn new(manager: Arc<Manager>, config: WorkerConfig) -> Self {
        let lifetime = config
            .lifetime
            .map(|l| rand::thread_rng().gen_range(l..=l + l / 10));
        Self {
            manager,
            lifetime,
            task_timeout: config.task_timeout,
            current_task: Mutex::new(None),
        }
    }

    /// The task currently in flight, if any — useful for a timeout log
    /// line or a diagnostics endpoint.
    pub fn current_task(&self) -> Option<TaskEnvelope> {
        self.current_task.lock().unwrap().clone()
    }

    /// Run `task` to completion under its effective timeout, treating an
    /// elapsed deadline exactly like a handler-raised [`DsqError::StopWorker`]:
    /// the in-flight task is lost (at-least-once trade-off) and the loop
    /// exits for a supervisor to restart. This is the async equivalent of
    /// the original's `SIGALRM`-based deadline enforcement.
    pub async fn process_one(&self, task: TaskEnvelope) -> DsqResult<()> {
        let effective_timeout = task.timeout.or(self.task_timeout);
        *self.current_task.lock().unwrap() = Some(task.clone());
        info!(task = %task.format(), "executing");

        let result = match effective_timeout {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), self.manager.process(task.clone(), None, true)).await {
                    Ok(inner) => inner.map(|_| ()),
                    Err(_) => {
                        warn!(task = %task.format(), "task exceeded timeout, stopping worker");
                        Err(DsqError::StopWorker)
                    }
                }
            }
            None => self.manager.process(task, None, true).await.map(|_| ()),
        };

        *self.current_task.lock().unwrap() = None;
        result
    }

    /// Pop from `queues` and process tasks until a shutdown signal fires,
    /// the worker's lifetime elapses, or (in burst mode) the queues drain.
    pub async fn run(&self, queues: &[String], burst: bool) -> DsqResult<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        install_signal_handler(shutdown.clone());

        let start = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            let task = self.manager.pop(queues, 1).await?;
            match task {
                Some(task) => match self.process_one(task).await {
                    Ok(()) => {}
                    Err(DsqError::StopWorker) => break,
                    Err(e) => {
                        error!(error = %e, "worker loop error");
                    }
                },
                None if burst => break,
                None => {}
            }

            if let Some(lifetime) = self.lifetime {
                if start.elapsed().as_secs() > lifetime {
                    info!("worker lifetime elapsed, exiting for restart");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn install_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        shutdown.store(true, Ordering::Relaxed);
    });
}
