use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::job::{Job, JobPriority, JobSpec, JobState};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::store::{JobStore, ListFilter};

const PROMOTE_INTERVAL: Duration = Duration::from_secs(10);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Counts by state plus a per-priority breakdown of live jobs.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub scheduled: usize,
    pub processing: usize,
    pub completed: usize,
    pub dead: usize,
    pub cancelled: usize,
    pub priorities: Vec<(JobPriority, usize)>,
}

/// The single place that knows the job state machine.
///
/// Orchestrates enqueue, completion, failure handling (retry or dead-letter),
/// promotion of scheduled jobs, the timeout reaper, retention cleanup and
/// crash recovery — all over the store's atomic primitives. Handles are cheap
/// to clone and share one underlying store and configuration.
#[derive(Clone)]
pub struct QueueService {
    store: Arc<JobStore>,
    config: Arc<RwLock<QueueConfig>>,
    running: Arc<AtomicBool>,
    sweepers: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl QueueService {
    pub fn new(store: Arc<JobStore>, config: Arc<RwLock<QueueConfig>>) -> Self {
        Self {
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
            sweepers: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn config(&self) -> &Arc<RwLock<QueueConfig>> {
        &self.config
    }

    /// Current poll interval for workers; re-read on every use so runtime
    /// config changes apply to the next iteration.
    pub fn poll_interval(&self) -> Duration {
        self.config.read().unwrap().workers.poll_interval
    }

    fn retry_policy(&self) -> RetryPolicy {
        let retry = self.config.read().unwrap().retry.clone();
        RetryPolicy::new(retry.base_delay, retry.max_delay, retry.jitter)
    }

    /// Recover from any previous crash and start the background sweepers.
    /// Must run before workers are spawned. Returns how many orphaned
    /// `Processing` jobs were reset to `Pending`.
    pub async fn start(&self) -> Result<usize> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let reset = self.store.reset_all_processing()?;
        if reset > 0 {
            warn!("crash recovery: reset {reset} processing jobs to pending");
        }

        let mut sweepers = self.sweepers.lock().await;
        sweepers.push(self.spawn_promoter());
        sweepers.push(self.spawn_reaper());
        sweepers.push(self.spawn_cleaner());
        info!("queue service started");

        Ok(reset)
    }

    /// Stop the background sweepers. Safe to call more than once.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut sweepers = self.sweepers.lock().await;
        for handle in sweepers.drain(..) {
            handle.abort();
        }
        info!("queue service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate and persist a new job. Fields missing from the spec are
    /// filled from configuration; the job starts `Scheduled` when `run_at`
    /// lies in the future and `Pending` otherwise.
    pub fn enqueue(&self, spec: JobSpec) -> Result<Job> {
        if spec.command.trim().is_empty() {
            return Err(QueueError::InvalidJobSpec(
                "command cannot be empty".to_string(),
            ));
        }

        let (default_max_retries, default_timeout) = {
            let config = self.config.read().unwrap();
            (config.retry.max_retries, config.jobs.default_timeout)
        };

        let job = spec.build(default_max_retries, default_timeout, Utc::now());
        self.store.insert(&job)?;
        metrics::record_enqueued(&job);
        info!(
            "enqueued job {} ({}, priority {})",
            job.id, job.state, job.priority
        );
        Ok(job)
    }

    /// Claim the next eligible job for `worker_id`, if any.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let claimed = self.store.claim_next(worker_id)?;
        if let Some(job) = &claimed {
            metrics::record_started(job);
            debug!("job {} claimed by {worker_id}", job.id);
        }
        Ok(claimed)
    }

    /// Record a successful attempt. Returns `None` when the job was no
    /// longer `Processing` (cancelled or reaped first); the report is then
    /// dropped.
    pub fn complete(
        &self,
        id: &str,
        exit_code: i32,
        output_ref: Option<String>,
    ) -> Result<Option<Job>> {
        let completed = self.store.complete_attempt(id, exit_code, output_ref)?;
        match &completed {
            Some(job) => {
                metrics::record_completed(job);
                info!("job {id} completed (attempt {})", job.attempts);
            }
            None => warn!("dropping completion report for job {id}: no longer processing"),
        }
        Ok(completed)
    }

    /// Record a failed attempt; the job is rescheduled with backoff while its
    /// retry budget lasts and dead-lettered after that.
    pub fn fail(&self, id: &str, exit_code: i32, reason: &str) -> Result<Option<Job>> {
        let policy = self.retry_policy();
        let failed = self.store.fail_attempt(id, &policy, exit_code, reason)?;
        match &failed {
            Some(job) if job.state == JobState::Pending => {
                metrics::record_retried(job);
                info!(
                    "job {id} failed (attempt {}), retrying at {:?}",
                    job.attempts, job.run_at
                );
            }
            Some(job) => {
                metrics::record_dead(job);
                warn!("job {id} moved to dead-letter queue: {reason}");
            }
            None => warn!("dropping failure report for job {id}: no longer processing"),
        }
        Ok(failed)
    }

    /// Reaper entry point for jobs whose execution deadline passed.
    pub fn timeout_job(&self, id: &str) -> Result<Option<Job>> {
        self.fail(id, -1, "timed out")
    }

    /// Dead-letter a claimed job whose command failed screening, bypassing
    /// the retry budget. The reason is preserved in the execution history.
    pub fn reject_command(&self, id: &str, reason: &str) -> Result<Option<Job>> {
        let rejected = self.store.reject_attempt(id, reason)?;
        if let Some(job) = &rejected {
            metrics::record_dead(job);
            warn!("job {id} rejected: {reason}");
        }
        Ok(rejected)
    }

    /// Cancel a job in any non-terminal state. The running command, if any,
    /// is left to finish; its completion report will be dropped.
    pub fn cancel(&self, id: &str) -> Result<Option<Job>> {
        let cancelled = self.store.cancel(id)?;
        if cancelled.is_some() {
            info!("job {id} cancelled");
        }
        Ok(cancelled)
    }

    /// Move scheduled jobs whose release time arrived to `Pending`. Each row
    /// is taken via a version check, so overlapping sweeps are harmless.
    pub fn promote_scheduled(&self) -> Result<usize> {
        let now = Utc::now();
        let mut promoted = 0;
        for (id, version) in self.store.scheduled_due(now) {
            let done = self
                .store
                .transition(&id, version, |job| job.promote(Utc::now()))?;
            if done.is_some() {
                debug!("scheduled job {id} promoted to pending");
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Fail every `Processing` job whose deadline has passed. A safety net
    /// for workers that died mid-job; the executor enforces the timeout for
    /// live workers.
    pub fn reap_timeouts(&self) -> Result<usize> {
        let now = Utc::now();
        let mut reaped = 0;
        for id in self.store.processing_expired(now) {
            if self.timeout_job(&id)?.is_some() {
                metrics::record_timeout_reaped();
                reaped += 1;
            }
        }
        if reaped > 0 {
            warn!("reaped {reaped} timed-out jobs");
        }
        Ok(reaped)
    }

    /// Retention sweep: drop old terminal jobs per the cleanup configuration.
    pub fn cleanup_old(&self) -> Result<usize> {
        let (completed_after, failed_after) = {
            let config = self.config.read().unwrap();
            (
                config.jobs.cleanup_completed_after,
                config.jobs.cleanup_failed_after,
            )
        };
        let now = Utc::now();
        let completed_cutoff = now - chrono::Duration::seconds(completed_after.as_secs() as i64);
        let failed_cutoff = now - chrono::Duration::seconds(failed_after.as_secs() as i64);

        let removed = self
            .store
            .purge_terminal_older_than(completed_cutoff, failed_cutoff)?;
        if removed > 0 {
            metrics::record_cleanup(removed);
            info!("cleanup removed {removed} old terminal jobs");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        self.store.get(id)
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Job>> {
        self.store.list(filter)
    }

    /// Dead jobs, most recently updated first.
    pub fn dlq_list(&self, limit: usize) -> Result<Vec<Job>> {
        let mut dead = self.store.list(&ListFilter {
            state: Some(JobState::Dead),
            ..Default::default()
        })?;
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if limit > 0 {
            dead.truncate(limit);
        }
        Ok(dead)
    }

    /// Send a dead job back to `Pending`, optionally resetting its attempt
    /// count or giving it a new retry budget.
    pub fn dlq_retry(
        &self,
        id: &str,
        reset_attempts: bool,
        new_max_retries: Option<u32>,
    ) -> Result<Job> {
        let job = self
            .store
            .retry_from_dlq(id, reset_attempts, new_max_retries)?;
        info!("job {id} re-queued from dead-letter queue");
        Ok(job)
    }

    pub fn dlq_purge_all(&self) -> Result<usize> {
        let purged = self.store.purge_dead_all()?;
        info!("purged {purged} dead jobs");
        Ok(purged)
    }

    pub fn dlq_purge_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(age.as_secs() as i64);
        let purged = self.store.purge_dead_older_than(cutoff)?;
        info!("purged {purged} dead jobs older than {}s", age.as_secs());
        Ok(purged)
    }

    pub fn reset_worker(&self, worker_id: &str) -> Result<usize> {
        self.store.reset_worker(worker_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total: self.store.count_all(),
            pending: self.store.count_by_state(JobState::Pending),
            scheduled: self.store.count_by_state(JobState::Scheduled),
            processing: self.store.count_by_state(JobState::Processing),
            completed: self.store.count_by_state(JobState::Completed),
            dead: self.store.count_by_state(JobState::Dead),
            cancelled: self.store.count_by_state(JobState::Cancelled),
            priorities: self.store.priority_counts(),
        }
    }

    fn spawn_promoter(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(PROMOTE_INTERVAL);
            loop {
                ticker.tick().await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                match service.promote_scheduled() {
                    Ok(n) if n > 0 => debug!("promoted {n} scheduled jobs"),
                    Ok(_) => {}
                    Err(e) => warn!("promote sweep failed: {e}"),
                }
            }
        })
    }

    fn spawn_reaper(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(REAP_INTERVAL);
            loop {
                ticker.tick().await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = service.reap_timeouts() {
                    warn!("timeout reap failed: {e}");
                }
            }
        })
    }

    fn spawn_cleaner(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                if !service.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = service.cleanup_old() {
                    warn!("cleanup sweep failed: {e}");
                }
            }
        })
    }
}
