//! Counters and timers for job outcomes, recorded through the `metrics`
//! facade. Installing an exporter is left to the embedding application.

use crate::job::Job;

pub fn record_enqueued(job: &Job) {
    let labels = [("priority", job.priority.as_str())];
    metrics::counter!("jobs_enqueued_total", &labels).increment(1);
}

pub fn record_started(job: &Job) {
    let labels = [("priority", job.priority.as_str())];
    metrics::counter!("jobs_started_total", &labels).increment(1);
}

pub fn record_completed(job: &Job) {
    let labels = [("priority", job.priority.as_str())];
    metrics::counter!("jobs_completed_total", &labels).increment(1);

    if let Some(record) = job.history.last() {
        let elapsed = (record.finished_at - record.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        metrics::histogram!("jobs_execution_seconds", &labels).record(elapsed);
    }
}

pub fn record_retried(job: &Job) {
    let labels = [("priority", job.priority.as_str())];
    metrics::counter!("jobs_retried_total", &labels).increment(1);
}

pub fn record_dead(job: &Job) {
    let labels = [("priority", job.priority.as_str())];
    metrics::counter!("jobs_dead_total", &labels).increment(1);
}

pub fn record_timeout_reaped() {
    metrics::counter!("jobs_reaped_total").increment(1);
}

pub fn record_cleanup(removed: usize) {
    metrics::counter!("jobs_cleaned_total").increment(removed as u64);
}
