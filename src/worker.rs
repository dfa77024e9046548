use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::{self, CommandExecutor};
use crate::job::Job;
use crate::service::QueueService;

/// Point-in-time snapshot of a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub running: bool,
    pub shutting_down: bool,
    pub current_job: Option<String>,
}

/// One claim-execute-report loop.
///
/// A worker owns a stable id and repeatedly claims the next eligible job,
/// screens its command, runs it through the executor and reports the outcome
/// back to the queue service. When the queue is empty it sleeps for the
/// configured poll interval. Store failures are treated as transient: logged,
/// then retried on the next poll.
pub struct Worker {
    id: String,
    service: QueueService,
    executor: Arc<CommandExecutor>,
    shutdown: AtomicBool,
    running: AtomicBool,
    current_job: Mutex<Option<String>>,
}

impl Worker {
    pub fn new(service: QueueService, executor: Arc<CommandExecutor>) -> Self {
        let id = format!("worker-{}", &Uuid::new_v4().to_string()[..8]);
        Self {
            id,
            service,
            executor,
            shutdown: AtomicBool::new(false),
            running: AtomicBool::new(false),
            current_job: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until shutdown is requested. The current job, if any, is always
    /// finished first; shutdown is only observed between iterations.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("worker {} started", self.id);

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.service.claim_next(&self.id) {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => tokio::time::sleep(self.service.poll_interval()).await,
                Err(e) => {
                    warn!("worker {} failed to poll queue: {e}", self.id);
                    tokio::time::sleep(self.service.poll_interval()).await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("worker {} stopped", self.id);
    }

    async fn process(&self, job: Job) {
        *self.current_job.lock().unwrap() = Some(job.id.clone());
        info!("worker {} processing job {}: {}", self.id, job.id, job.command);

        if let Some(reason) = executor::screen(&job.command) {
            if let Err(e) = self.service.reject_command(&job.id, &reason) {
                error!("worker {} failed to reject job {}: {e}", self.id, job.id);
            }
            *self.current_job.lock().unwrap() = None;
            return;
        }

        let outcome = self.executor.execute(&job).await;
        let report = if outcome.success {
            self.service
                .complete(&job.id, outcome.exit_code, outcome.output_ref.clone())
                .map(|_| ())
        } else {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "unknown execution failure".to_string());
            self.service
                .fail(&job.id, outcome.exit_code, &reason)
                .map(|_| ())
        };

        if let Err(e) = report {
            // Keep the loop alive; make sure the job does not hang around in
            // Processing forever.
            error!("worker {} failed to report job {}: {e}", self.id, job.id);
            let _ = self
                .service
                .fail(&job.id, -1, &format!("worker error: {e}"));
        }

        *self.current_job.lock().unwrap() = None;
    }

    /// Ask the worker to exit after its current job.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn current_job(&self) -> Option<String> {
        self.current_job.lock().unwrap().clone()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.id.clone(),
            running: self.is_running(),
            shutting_down: self.is_shutting_down(),
            current_job: self.current_job(),
        }
    }
}
