use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::executor::CommandExecutor;
use crate::service::QueueService;
use crate::worker::{Worker, WorkerStatus};

struct WorkerHandle {
    worker: Arc<Worker>,
    handle: JoinHandle<()>,
    // Spawn order; scale-down falls back to busy workers oldest first.
    seq: usize,
}

/// Snapshot of the pool for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub active_workers: usize,
    pub jobs_processing: usize,
    pub uptime_secs: u64,
    pub workers: Vec<WorkerStatus>,
}

/// Manages a set of workers keyed by worker id.
///
/// Workers run as independent tokio tasks; the registry is the only shared
/// in-memory state between them, everything else goes through the store.
pub struct WorkerPool {
    service: QueueService,
    executor: Arc<CommandExecutor>,
    workers: DashMap<String, WorkerHandle>,
    next_seq: AtomicUsize,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl WorkerPool {
    pub fn new(service: QueueService, executor: Arc<CommandExecutor>) -> Self {
        Self {
            service,
            executor,
            workers: DashMap::new(),
            next_seq: AtomicUsize::new(0),
            started_at: Mutex::new(None),
        }
    }

    /// Spawn `count` workers, capped so the pool never exceeds the configured
    /// maximum. Returns how many were actually started.
    pub fn start(&self, count: usize) -> usize {
        let max_workers = self.service.config().read().unwrap().workers.max_workers;
        let room = max_workers.saturating_sub(self.workers.len());
        let count = count.min(room);

        self.started_at.lock().unwrap().get_or_insert_with(Utc::now);

        for _ in 0..count {
            self.spawn_worker();
        }
        info!("started {count} workers (pool size {})", self.workers.len());
        count
    }

    fn spawn_worker(&self) -> String {
        let worker = Arc::new(Worker::new(self.service.clone(), Arc::clone(&self.executor)));
        let id = worker.id().to_string();
        let runner = Arc::clone(&worker);
        let handle = tokio::spawn(async move { runner.run().await });
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.workers.insert(id.clone(), WorkerHandle { worker, handle, seq });
        id
    }

    pub fn scale_up(&self, count: usize) -> usize {
        self.start(count)
    }

    /// Stop `count` workers, preferring idle ones; busy workers are asked to
    /// stop in spawn order and finish their current job first.
    pub fn scale_down(&self, count: usize) -> usize {
        let mut candidates: Vec<(usize, bool, String)> = self
            .workers
            .iter()
            .map(|e| (e.seq, e.worker.current_job().is_some(), e.key().clone()))
            .collect();
        // Idle first, then by spawn order.
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut removed = 0;
        for (_, _, id) in candidates.into_iter().take(count) {
            if let Some((_, entry)) = self.workers.remove(&id) {
                entry.worker.shutdown();
                removed += 1;
                info!("scaled down worker {id}");
            }
        }
        removed
    }

    /// Signal every worker to stop and wait up to `timeout` for them to
    /// finish their current job. Stragglers are aborted and their claims
    /// released. Returns `true` when everything exited within the deadline.
    pub async fn stop_graceful(&self, timeout: Duration) -> bool {
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return true;
        }
        info!(
            "stopping {} workers gracefully (timeout {}s)",
            ids.len(),
            timeout.as_secs()
        );

        for entry in self.workers.iter() {
            entry.worker.shutdown();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;

        for id in ids {
            let Some((_, mut entry)) = self.workers.remove(&id) else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut entry.handle).await {
                Ok(_) => {}
                Err(_) => {
                    clean = false;
                    warn!("worker {id} did not stop in time, forcing shutdown");
                    entry.handle.abort();
                    match self.service.reset_worker(&id) {
                        Ok(n) if n > 0 => warn!("released {n} jobs claimed by {id}"),
                        Ok(_) => {}
                        Err(e) => warn!("failed to release jobs for {id}: {e}"),
                    }
                }
            }
        }

        if clean {
            info!("all workers stopped gracefully");
        }
        clean
    }

    /// Abort every worker immediately. In-flight commands are not killed;
    /// their claims are released so other workers can pick the jobs up again.
    pub async fn stop_immediate(&self) {
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        warn!("stopping {} workers immediately", ids.len());

        for id in ids {
            let Some((_, entry)) = self.workers.remove(&id) else {
                continue;
            };
            entry.worker.shutdown();
            entry.handle.abort();
            if let Err(e) = self.service.reset_worker(&id) {
                warn!("failed to release jobs for {id}: {e}");
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let workers: Vec<WorkerStatus> = {
            let mut snapshots: Vec<(usize, WorkerStatus)> = self
                .workers
                .iter()
                .map(|e| (e.seq, e.worker.status()))
                .collect();
            snapshots.sort_by_key(|(seq, _)| *seq);
            snapshots.into_iter().map(|(_, s)| s).collect()
        };

        let uptime_secs = self
            .started_at
            .lock()
            .unwrap()
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);

        PoolStatus {
            total_workers: workers.len(),
            active_workers: workers.iter().filter(|w| w.running).count(),
            jobs_processing: workers.iter().filter(|w| w.current_job.is_some()).count(),
            uptime_secs,
            workers,
        }
    }
}
