use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::Path;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobPriority, JobState};
use crate::retry::RetryPolicy;

const JOB_PREFIX: &str = "jobs:";

fn job_key(id: &str) -> String {
    format!("{JOB_PREFIX}{id}")
}

// Slice of a job kept in memory for scans; the sled record stays the source
// of truth and every mutation is decided by compare-and-swap against it.
#[derive(Debug, Clone)]
struct IndexEntry {
    state: JobState,
    priority: JobPriority,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
}

impl From<&Job> for IndexEntry {
    fn from(job: &Job) -> Self {
        Self {
            state: job.state,
            priority: job.priority,
            created_at: job.created_at,
            updated_at: job.updated_at,
            run_at: job.run_at,
            deadline_at: job.deadline_at,
            finished_at: job.finished_at,
            worker_id: job.worker_id.clone(),
        }
    }
}

/// Read-only scan parameters for [`JobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<JobState>,
    pub priority: Option<JobPriority>,
    pub worker_id: Option<String>,
    pub offset: usize,
    /// `0` means no limit.
    pub limit: usize,
    /// Sort by `created_at` descending instead of ascending.
    pub newest_first: bool,
}

/// Durable job storage.
///
/// Jobs are bincode-encoded records in sled, mirrored by an in-memory index
/// used for candidate scans and counts. Every state-mutating write goes
/// through `compare_and_swap` on the serialized record, so two concurrent
/// writers can never both succeed against the same version of a job; the
/// loser re-reads and re-decides (or, for claims, moves on to the next
/// candidate). This is what makes the claim protocol and all transitions
/// race-free without locks.
pub struct JobStore {
    db: sled::Db,
    index: DashMap<String, IndexEntry>,
}

impl JobStore {
    /// Open a store at `path`, loading the index from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(super::open_db(path)?)
    }

    /// Build a store over an already-open database.
    pub fn new(db: sled::Db) -> Result<Self> {
        let store = Self {
            db,
            index: DashMap::new(),
        };
        store.load_index()?;
        Ok(store)
    }

    fn load_index(&self) -> Result<()> {
        for entry in self.db.scan_prefix(JOB_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| QueueError::Codec("invalid UTF-8 in job key".to_string()))?;
            let id = key.strip_prefix(JOB_PREFIX).unwrap_or(&key).to_string();
            let job: Job = bincode::deserialize(&value)?;
            self.index.insert(id, IndexEntry::from(&job));
        }
        Ok(())
    }

    /// Insert a fresh job. Fails with `DuplicateId` if the id already exists.
    pub fn insert(&self, job: &Job) -> Result<()> {
        let key = job_key(&job.id);
        let bytes = bincode::serialize(job)?;
        match self.db.compare_and_swap(&key, None::<&[u8]>, Some(bytes))? {
            Ok(()) => {
                self.index.insert(job.id.clone(), IndexEntry::from(job));
                Ok(())
            }
            Err(_) => Err(QueueError::DuplicateId(job.id.clone())),
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        match self.db.get(job_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but `NotFound` when the id is missing.
    pub fn require(&self, id: &str) -> Result<Job> {
        self.get(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub fn count_by_state(&self, state: JobState) -> usize {
        self.index.iter().filter(|e| e.state == state).count()
    }

    pub fn count_all(&self) -> usize {
        self.index.len()
    }

    /// Counts of non-terminal jobs per priority, highest first.
    pub fn priority_counts(&self) -> Vec<(JobPriority, usize)> {
        let mut counts = [
            (JobPriority::Critical, 0usize),
            (JobPriority::High, 0),
            (JobPriority::Medium, 0),
            (JobPriority::Low, 0),
        ];
        for entry in self.index.iter() {
            if entry.state.is_terminal() {
                continue;
            }
            for slot in counts.iter_mut() {
                if slot.0 == entry.priority {
                    slot.1 += 1;
                }
            }
        }
        counts.to_vec()
    }

    /// Scan jobs matching `filter`, sorted by `created_at`.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Job>> {
        let mut ids: Vec<(DateTime<Utc>, String)> = self
            .index
            .iter()
            .filter(|e| filter.state.map_or(true, |s| e.state == s))
            .filter(|e| filter.priority.map_or(true, |p| e.priority == p))
            .filter(|e| {
                filter
                    .worker_id
                    .as_deref()
                    .map_or(true, |w| e.worker_id.as_deref() == Some(w))
            })
            .map(|e| (e.created_at, e.key().clone()))
            .collect();

        ids.sort_by(|a, b| a.cmp(b));
        if filter.newest_first {
            ids.reverse();
        }

        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };

        let mut jobs = Vec::new();
        for (_, id) in ids.into_iter().skip(filter.offset).take(limit) {
            if let Some(job) = self.get(&id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Atomically claim the next eligible job for `worker_id`.
    ///
    /// Candidates are pending jobs whose `run_at` (if any) has passed,
    /// ordered by priority weight descending, then `created_at` ascending,
    /// then id. Each candidate is re-read and claimed via compare-and-swap;
    /// the first swap that lands wins. A concurrent claimer either takes a
    /// different job or comes up empty and polls again — the same job can
    /// never be handed to two workers.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now();

        let mut candidates: Vec<(u32, DateTime<Utc>, String)> = self
            .index
            .iter()
            .filter(|e| e.state == JobState::Pending && e.run_at.map_or(true, |t| t <= now))
            .map(|e| (e.priority.weight(), e.created_at, e.key().clone()))
            .collect();

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        for (_, _, id) in candidates {
            let key = job_key(&id);
            let Some(current) = self.db.get(&key)? else {
                self.index.remove(&id);
                continue;
            };
            let mut job: Job = bincode::deserialize(&current)?;
            if !job.is_ready(now) {
                // Stale index entry; refresh and move on.
                self.index.insert(id, IndexEntry::from(&job));
                continue;
            }

            job.claim(worker_id, now);
            let swapped = self
                .db
                .compare_and_swap(&key, Some(&current), Some(bincode::serialize(&job)?))?;
            if swapped.is_ok() {
                self.index.insert(id, IndexEntry::from(&job));
                return Ok(Some(job));
            }
            // Lost the race for this candidate; try the next one.
        }

        Ok(None)
    }

    // Read-modify-CAS loop. `apply` returns false to abort without writing,
    // which surfaces as Ok(None).
    fn update_with<F>(&self, id: &str, mut apply: F) -> Result<Option<Job>>
    where
        F: FnMut(&mut Job) -> bool,
    {
        let key = job_key(id);
        loop {
            let Some(current) = self.db.get(&key)? else {
                return Err(QueueError::NotFound(id.to_string()));
            };
            let mut job: Job = bincode::deserialize(&current)?;
            if !apply(&mut job) {
                return Ok(None);
            }
            let swapped = self
                .db
                .compare_and_swap(&key, Some(&current), Some(bincode::serialize(&job)?))?;
            if swapped.is_ok() {
                self.index.insert(id.to_string(), IndexEntry::from(&job));
                return Ok(Some(job));
            }
        }
    }

    /// Apply `patch` only if the stored `version` equals `expected_version`;
    /// returns `None` when another writer got there first.
    pub fn transition<F>(&self, id: &str, expected_version: u64, patch: F) -> Result<Option<Job>>
    where
        F: Fn(&mut Job),
    {
        self.update_with(id, |job| {
            if job.version != expected_version {
                return false;
            }
            patch(job);
            job.version = expected_version + 1;
            job.updated_at = Utc::now();
            true
        })
    }

    /// Return a claimed job to `Pending` untouched. Only succeeds while the
    /// job is still `Processing` and owned by `worker_id`.
    pub fn release(&self, id: &str, worker_id: &str) -> Result<bool> {
        let released = self.update_with(id, |job| {
            if job.state != JobState::Processing || job.worker_id.as_deref() != Some(worker_id) {
                return false;
            }
            job.release(Utc::now());
            true
        })?;
        Ok(released.is_some())
    }

    /// Record a successful attempt for a processing job.
    pub fn complete_attempt(
        &self,
        id: &str,
        exit_code: i32,
        output_ref: Option<String>,
    ) -> Result<Option<Job>> {
        self.update_with(id, |job| {
            if job.state != JobState::Processing {
                return false;
            }
            job.complete_attempt(exit_code, output_ref.clone(), Utc::now());
            true
        })
    }

    /// Record a failed attempt for a processing job; the job either goes back
    /// to `Pending` with backoff or to `Dead` when retries are exhausted. The
    /// whole decision lands in one atomic write.
    pub fn fail_attempt(
        &self,
        id: &str,
        policy: &RetryPolicy,
        exit_code: i32,
        reason: &str,
    ) -> Result<Option<Job>> {
        self.update_with(id, |job| {
            if job.state != JobState::Processing {
                return false;
            }
            job.fail_attempt(policy, exit_code, reason, Utc::now());
            true
        })
    }

    /// Fail a processing job straight to `Dead`, bypassing the retry budget.
    /// Used for commands that were rejected before execution.
    pub fn reject_attempt(&self, id: &str, reason: &str) -> Result<Option<Job>> {
        self.update_with(id, |job| {
            if job.state != JobState::Processing {
                return false;
            }
            job.dead_attempt(-1, reason, Utc::now());
            true
        })
    }

    /// Operator-initiated move to the dead-letter queue.
    pub fn move_to_dlq(&self, id: &str, reason: &str) -> Result<Job> {
        let moved = self.update_with(id, |job| {
            if job.state.is_terminal() {
                return false;
            }
            job.mark_dead(reason, Utc::now());
            true
        })?;
        moved.ok_or_else(|| QueueError::VersionConflict(format!("{id} is already terminal")))
    }

    /// Bring a dead job back to `Pending`.
    pub fn retry_from_dlq(
        &self,
        id: &str,
        reset_attempts: bool,
        new_max_retries: Option<u32>,
    ) -> Result<Job> {
        let retried = self.update_with(id, |job| {
            if job.state != JobState::Dead {
                return false;
            }
            job.retry_from_dlq(reset_attempts, new_max_retries, Utc::now());
            true
        })?;
        retried.ok_or_else(|| QueueError::NotFound(format!("{id} is not in the dead-letter queue")))
    }

    /// Cancel any non-terminal job.
    pub fn cancel(&self, id: &str) -> Result<Option<Job>> {
        self.update_with(id, |job| {
            if job.state.is_terminal() {
                return false;
            }
            job.cancel(Utc::now());
            true
        })
    }

    /// Boot-time crash recovery: every `Processing` job goes back to
    /// `Pending` with its claim fields cleared. Idempotent; running it twice
    /// is the same as running it once.
    pub fn reset_all_processing(&self) -> Result<usize> {
        let stuck: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.state == JobState::Processing)
            .map(|e| e.key().clone())
            .collect();

        let mut reset = 0;
        for id in stuck {
            let released = self.update_with(&id, |job| {
                if job.state != JobState::Processing {
                    return false;
                }
                job.release(Utc::now());
                true
            })?;
            if released.is_some() {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Release every job still claimed by `worker_id`; used when a worker is
    /// stopped without finishing its job.
    pub fn reset_worker(&self, worker_id: &str) -> Result<usize> {
        let claimed: Vec<String> = self
            .index
            .iter()
            .filter(|e| {
                e.state == JobState::Processing && e.worker_id.as_deref() == Some(worker_id)
            })
            .map(|e| e.key().clone())
            .collect();

        let mut reset = 0;
        for id in claimed {
            if self.release(&id, worker_id)? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Ids and versions of scheduled jobs whose release time has arrived.
    pub fn scheduled_due(&self, now: DateTime<Utc>) -> Vec<(String, u64)> {
        let due: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.state == JobState::Scheduled && e.run_at.map_or(false, |t| t <= now))
            .map(|e| e.key().clone())
            .collect();

        due.into_iter()
            .filter_map(|id| match self.get(&id) {
                Ok(Some(job)) if job.state == JobState::Scheduled => Some((id, job.version)),
                _ => None,
            })
            .collect()
    }

    /// Ids of processing jobs whose execution deadline has passed.
    pub fn processing_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.index
            .iter()
            .filter(|e| e.state == JobState::Processing && e.deadline_at.map_or(false, |t| t < now))
            .map(|e| e.key().clone())
            .collect()
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.db.remove(job_key(id))?;
        self.index.remove(id);
        Ok(())
    }

    /// Delete every dead job; returns how many were removed.
    pub fn purge_dead_all(&self) -> Result<usize> {
        self.purge_matching(|e| e.state == JobState::Dead)
    }

    /// Delete dead jobs that finished before `cutoff`.
    pub fn purge_dead_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.purge_matching(|e| {
            e.state == JobState::Dead && e.finished_at.unwrap_or(e.updated_at) < cutoff
        })
    }

    /// Retention sweep: drop completed jobs finished before
    /// `completed_cutoff` and dead/cancelled jobs finished before
    /// `failed_cutoff`.
    pub fn purge_terminal_older_than(
        &self,
        completed_cutoff: DateTime<Utc>,
        failed_cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        self.purge_matching(|e| {
            let finished = e.finished_at.unwrap_or(e.updated_at);
            match e.state {
                JobState::Completed => finished < completed_cutoff,
                JobState::Dead | JobState::Cancelled => finished < failed_cutoff,
                _ => false,
            }
        })
    }

    fn purge_matching<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let doomed: Vec<String> = self
            .index
            .iter()
            .filter(|e| matches(e.value()))
            .map(|e| e.key().clone())
            .collect();

        for id in &doomed {
            self.remove(id)?;
        }
        Ok(doomed.len())
    }

    /// Force pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for JobStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            tracing::error!("failed to flush job store on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> JobStore {
        JobStore::open(dir.path().join("jobs.db")).unwrap()
    }

    fn pending(command: &str) -> Job {
        JobSpec::new(command).build(3, Duration::from_secs(30), Utc::now())
    }

    #[test]
    fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = pending("echo hi");
        store.insert(&job).unwrap();

        let loaded = store.require(&job.id).unwrap();
        assert_eq!(loaded.command, "echo hi");
        assert_eq!(loaded.state, JobState::Pending);
        assert_eq!(store.count_all(), 1);
    }

    #[test]
    fn test_insert_duplicate_id_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = pending("echo hi");
        store.insert(&job).unwrap();
        assert!(matches!(
            store.insert(&job),
            Err(QueueError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_claim_orders_by_priority_then_age() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let older_low = JobSpec::new("low")
            .with_priority(JobPriority::Low)
            .build(3, Duration::from_secs(30), now - chrono::Duration::seconds(10));
        let critical = JobSpec::new("critical")
            .with_priority(JobPriority::Critical)
            .build(3, Duration::from_secs(30), now);
        let older_medium = JobSpec::new("medium-old")
            .build(3, Duration::from_secs(30), now - chrono::Duration::seconds(5));
        let newer_medium =
            JobSpec::new("medium-new").build(3, Duration::from_secs(30), now);

        for job in [&older_low, &critical, &older_medium, &newer_medium] {
            store.insert(job).unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| {
            store.claim_next("w").unwrap().map(|j| j.command.clone())
        })
        .collect();
        assert_eq!(order, ["critical", "medium-old", "medium-new", "low"]);
    }

    #[test]
    fn test_claim_skips_future_run_at() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let later = JobSpec::new("later")
            .run_at(now + chrono::Duration::hours(1))
            .build(3, Duration::from_secs(30), now);
        // Scheduled in the future, so state is Scheduled and not claimable
        // even once promoted early.
        store.insert(&later).unwrap();

        assert!(store.claim_next("w").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.insert(&pending("solo")).unwrap();

        let first = store.claim_next("w1").unwrap();
        let second = store.claim_next("w2").unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let claimed = first.unwrap();
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert!(claimed.deadline_at.is_some());
    }

    #[test]
    fn test_release_requires_owner() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = pending("echo hi");
        store.insert(&job).unwrap();
        store.claim_next("w1").unwrap().unwrap();

        assert!(!store.release(&job.id, "w2").unwrap());
        assert!(store.release(&job.id, "w1").unwrap());

        let released = store.require(&job.id).unwrap();
        assert_eq!(released.state, JobState::Pending);
        assert!(released.worker_id.is_none());
        assert!(released.claimed_at.is_none());
        assert!(released.deadline_at.is_none());
    }

    #[test]
    fn test_transition_rejects_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = pending("echo hi");
        store.insert(&job).unwrap();

        let stale = store
            .transition(&job.id, job.version + 5, |j| j.cancel(Utc::now()))
            .unwrap();
        assert!(stale.is_none());

        let fresh = store
            .transition(&job.id, job.version, |j| j.cancel(Utc::now()))
            .unwrap();
        assert!(fresh.is_some());
        assert_eq!(store.require(&job.id).unwrap().state, JobState::Cancelled);
    }

    #[test]
    fn test_fail_attempt_retries_then_dead_letters() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 0.0);

        let job = JobSpec::new("flaky")
            .with_max_retries(1)
            .build(3, Duration::from_secs(30), Utc::now());
        store.insert(&job).unwrap();

        store.claim_next("w").unwrap().unwrap();
        let retried = store
            .fail_attempt(&job.id, &policy, 1, "boom")
            .unwrap()
            .unwrap();
        assert_eq!(retried.state, JobState::Pending);
        assert_eq!(retried.attempts, 1);
        assert!(retried.run_at.unwrap() > Utc::now() - chrono::Duration::seconds(1));

        // Second failure exhausts the budget.
        std::thread::sleep(Duration::from_millis(30));
        store.claim_next("w").unwrap().unwrap();
        let dead = store
            .fail_attempt(&job.id, &policy, 1, "boom")
            .unwrap()
            .unwrap();
        assert_eq!(dead.state, JobState::Dead);
        assert_eq!(dead.attempts, 2);
        assert!(dead.error_message.unwrap().contains("max retries"));
        assert_eq!(dead.history.len(), 2);
    }

    #[test]
    fn test_fail_attempt_ignores_non_processing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let policy = RetryPolicy::default();

        let job = pending("echo hi");
        store.insert(&job).unwrap();

        assert!(store
            .fail_attempt(&job.id, &policy, 1, "boom")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reset_all_processing_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for i in 0..3 {
            store.insert(&pending(&format!("job {i}"))).unwrap();
        }
        store.claim_next("w1").unwrap().unwrap();
        store.claim_next("w2").unwrap().unwrap();

        assert_eq!(store.reset_all_processing().unwrap(), 2);
        assert_eq!(store.reset_all_processing().unwrap(), 0);
        assert_eq!(store.count_by_state(JobState::Pending), 3);
        assert_eq!(store.count_by_state(JobState::Processing), 0);
    }

    #[test]
    fn test_reset_worker_only_touches_its_jobs() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.insert(&pending("a")).unwrap();
        store.insert(&pending("b")).unwrap();
        let mine = store.claim_next("w1").unwrap().unwrap();
        let theirs = store.claim_next("w2").unwrap().unwrap();

        assert_eq!(store.reset_worker("w1").unwrap(), 1);
        assert_eq!(store.require(&mine.id).unwrap().state, JobState::Pending);
        assert_eq!(
            store.require(&theirs.id).unwrap().state,
            JobState::Processing
        );
    }

    #[test]
    fn test_purge_dead() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let job = pending("doomed");
        store.insert(&job).unwrap();
        store.move_to_dlq(&job.id, "operator says no").unwrap();
        store.insert(&pending("alive")).unwrap();

        assert_eq!(store.purge_dead_all().unwrap(), 1);
        assert!(store.get(&job.id).unwrap().is_none());
        assert_eq!(store.count_all(), 1);
    }

    #[test]
    fn test_list_filters_and_pages() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        for i in 0..5 {
            let job = JobSpec::new(format!("job {i}")).build(
                3,
                Duration::from_secs(30),
                now + chrono::Duration::milliseconds(i),
            );
            store.insert(&job).unwrap();
        }

        let all = store.list(&ListFilter::default()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].command, "job 0");

        let page = store
            .list(&ListFilter {
                offset: 1,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].command, "job 1");

        let none = store
            .list(&ListFilter {
                state: Some(JobState::Dead),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");
        let id;
        {
            let store = JobStore::open(&path).unwrap();
            let job = pending("persistent");
            id = job.id.clone();
            store.insert(&job).unwrap();
        }
        {
            let store = JobStore::open(&path).unwrap();
            assert_eq!(store.count_by_state(JobState::Pending), 1);
            assert_eq!(store.require(&id).unwrap().command, "persistent");
        }
    }
}
