use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::QueueError;
use crate::retry::RetryPolicy;

/// Lifecycle state of a job.
///
/// Jobs move `Pending -> Processing -> Completed`, or back to `Pending` with a
/// future `run_at` when a failed attempt still has retries left, or to `Dead`
/// once retries are exhausted. `Scheduled` jobs become `Pending` when their
/// release time arrives. `Completed`, `Dead` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Waiting for its `run_at` release time.
    Scheduled,
    /// Claimed and currently executing on a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Permanently failed; parked in the dead-letter queue.
    Dead,
    /// Cancelled by an operator.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Dead | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Scheduled => "scheduled",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "scheduled" => Ok(JobState::Scheduled),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(QueueError::InvalidValue(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

/// Priority for claim ordering. Higher priorities are always claimed before
/// lower ones; within a priority, jobs are claimed oldest first.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Cleanup, analytics, non-urgent work.
    Low,
    /// Default for most jobs.
    Medium,
    /// User-facing operations.
    High,
    /// Alerts and emergency tasks.
    Critical,
}

impl JobPriority {
    /// Numeric weight used for claim ordering; higher means claimed earlier.
    pub fn weight(&self) -> u32 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Medium => 10,
            JobPriority::High => 100,
            JobPriority::Critical => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Medium
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(JobPriority::Low),
            "medium" => Ok(JobPriority::Medium),
            "high" => Ok(JobPriority::High),
            "critical" => Ok(JobPriority::Critical),
            other => Err(QueueError::InvalidValue(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

/// One finished execution attempt, kept for debugging and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Attempt number, 1-based.
    pub attempt: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub output_ref: Option<String>,
    pub successful: bool,
}

/// A durable background job: one shell command plus the policy and lifecycle
/// bookkeeping needed to run it at-least-once across worker crashes.
///
/// All mutation goes through the transition methods below; every transition
/// bumps `version`, which the store uses for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub priority: JobPriority,
    pub state: JobState,
    /// Completed execution attempts so far.
    pub attempts: u32,
    /// Additional attempts allowed after the first failure before the job is
    /// parked in the dead-letter queue.
    pub max_retries: u32,
    /// Wall-clock budget for a single execution.
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest claim time; `None` means immediately eligible.
    pub run_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    /// `started_at + timeout`, set at claim; the reaper fails the job once
    /// this passes.
    pub deadline_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    /// Opaque handle to captured stdout/stderr of the last attempt.
    pub output_ref: Option<String>,
    /// Monotonic write counter; incremented by every transition.
    pub version: u64,
    /// Append-only record of finished attempts, in attempt order.
    pub history: Vec<ExecutionRecord>,
}

impl Job {
    /// True when a worker may claim this job right now.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at.map_or(true, |t| t <= now)
    }

    /// True when the job is `Processing` and its execution deadline passed.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Processing && self.deadline_at.map_or(false, |t| t < now)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    fn clear_claim(&mut self) {
        self.worker_id = None;
        self.claimed_at = None;
        self.started_at = None;
        self.deadline_at = None;
    }

    fn timeout_delta(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.timeout.as_millis().min(i64::MAX as u128) as i64)
    }

    fn finish_record(
        &self,
        now: DateTime<Utc>,
        exit_code: Option<i32>,
        error_message: Option<String>,
        output_ref: Option<String>,
        successful: bool,
    ) -> ExecutionRecord {
        ExecutionRecord {
            attempt: self.attempts + 1,
            worker_id: self.worker_id.clone().unwrap_or_default(),
            started_at: self.started_at.unwrap_or(now),
            finished_at: now,
            exit_code,
            error_message,
            output_ref,
            successful,
        }
    }

    /// Take ownership for `worker_id`: Pending -> Processing with the claim
    /// fields set and the execution deadline computed.
    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.state = JobState::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.claimed_at = Some(now);
        self.started_at = Some(now);
        self.deadline_at = Some(now + self.timeout_delta());
        self.touch(now);
    }

    /// Record a successful attempt: Processing -> Completed.
    pub fn complete_attempt(
        &mut self,
        exit_code: i32,
        output_ref: Option<String>,
        now: DateTime<Utc>,
    ) {
        let record = self.finish_record(now, Some(exit_code), None, output_ref.clone(), true);
        self.history.push(record);
        self.attempts += 1;
        self.state = JobState::Completed;
        self.exit_code = Some(exit_code);
        self.output_ref = output_ref;
        self.error_message = None;
        self.finished_at = Some(now);
        self.clear_claim();
        self.touch(now);
    }

    /// Record a failed attempt that still has retries left: Processing ->
    /// Pending with `run_at` pushed into the future.
    pub fn retry_attempt(
        &mut self,
        exit_code: i32,
        reason: &str,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let record =
            self.finish_record(now, Some(exit_code), Some(reason.to_string()), None, false);
        self.history.push(record);
        self.attempts += 1;
        self.state = JobState::Pending;
        self.run_at = Some(next_run_at);
        self.exit_code = Some(exit_code);
        self.error_message = Some(reason.to_string());
        self.clear_claim();
        self.touch(now);
    }

    /// Record a failed attempt with no retries left: Processing -> Dead.
    pub fn dead_attempt(&mut self, exit_code: i32, reason: &str, now: DateTime<Utc>) {
        let record =
            self.finish_record(now, Some(exit_code), Some(reason.to_string()), None, false);
        self.history.push(record);
        self.attempts += 1;
        self.mark_dead(reason, now);
    }

    /// Park the job in the dead-letter queue without touching the attempt
    /// count. `dead_attempt` is the usual entry point; this one backs direct
    /// operator moves.
    pub fn mark_dead(&mut self, reason: &str, now: DateTime<Utc>) {
        self.state = JobState::Dead;
        self.error_message = Some(reason.to_string());
        self.finished_at = Some(now);
        self.clear_claim();
        self.touch(now);
    }

    /// Pick the outcome of a finished failed attempt: retry with backoff while
    /// the budget allows, dead-letter otherwise.
    pub fn fail_attempt(
        &mut self,
        policy: &RetryPolicy,
        exit_code: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        if policy.should_retry(self.attempts, self.max_retries) {
            let delay = policy.delay(self.attempts + 1);
            let next =
                now + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
            self.retry_attempt(exit_code, reason, next, now);
        } else {
            let reason = format!("max retries exceeded: {reason}");
            self.dead_attempt(exit_code, &reason, now);
        }
    }

    /// Give the job back untouched: Processing -> Pending, attempts unchanged.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Pending;
        self.clear_claim();
        self.touch(now);
    }

    /// Scheduled -> Pending once `run_at` arrives.
    pub fn promote(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Pending;
        self.touch(now);
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Cancelled;
        self.finished_at = Some(now);
        self.clear_claim();
        self.touch(now);
    }

    /// Bring a dead job back to Pending, optionally resetting its retry
    /// budget.
    pub fn retry_from_dlq(
        &mut self,
        reset_attempts: bool,
        new_max_retries: Option<u32>,
        now: DateTime<Utc>,
    ) {
        if reset_attempts {
            self.attempts = 0;
        }
        if let Some(max) = new_max_retries {
            self.max_retries = max;
        }
        self.state = JobState::Pending;
        self.run_at = None;
        self.error_message = None;
        self.finished_at = None;
        self.touch(now);
    }
}

/// What a client submits. Unset fields are filled from configuration at
/// enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub command: String,
    pub id: Option<String>,
    pub priority: Option<JobPriority>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub run_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    /// Materialize the spec into a fresh job, filling unset fields from the
    /// provided defaults. The initial state is `Scheduled` when `run_at` lies
    /// in the future, `Pending` otherwise.
    pub fn build(
        self,
        default_max_retries: u32,
        default_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Job {
        let state = match self.run_at {
            Some(at) if at > now => JobState::Scheduled,
            _ => JobState::Pending,
        };

        Job {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            command: self.command,
            priority: self.priority.unwrap_or_default(),
            state,
            attempts: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            timeout: self.timeout.unwrap_or(default_timeout),
            created_at: now,
            updated_at: now,
            run_at: self.run_at,
            claimed_at: None,
            started_at: None,
            deadline_at: None,
            finished_at: None,
            worker_id: None,
            exit_code: None,
            error_message: None,
            output_ref: None,
            version: 0,
            history: Vec::new(),
        }
    }
}
