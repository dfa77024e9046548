use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QueueError, Result};

/// Runtime configuration for the queue.
///
/// Every value can be changed while the system is running; changes take
/// effect on next use. Jobs that were already claimed keep the `timeout` and
/// `max_retries` they captured at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub workers: WorkersConfig,
    pub retry: RetryConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Upper bound on pool size.
    pub max_workers: usize,
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// How long a graceful stop waits before forcing workers down.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction applied to backoff delays; `0` disables jitter.
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub default_timeout: Duration,
    /// Completed jobs older than this are removed by the cleanup sweeper.
    pub cleanup_completed_after: Duration,
    /// Dead and cancelled jobs older than this are removed by the cleanup
    /// sweeper.
    pub cleanup_failed_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: WorkersConfig {
                max_workers: 5,
                poll_interval: Duration::from_secs(1),
                shutdown_timeout: Duration::from_secs(30),
            },
            retry: RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(5 * 60),
                jitter: 0.0,
            },
            jobs: JobsConfig {
                default_timeout: Duration::from_secs(30 * 60),
                cleanup_completed_after: Duration::from_secs(7 * 24 * 3600),
                cleanup_failed_after: Duration::from_secs(30 * 24 * 3600),
            },
        }
    }
}

impl QueueConfig {
    /// Look up a value by its dotted key, e.g. `retry.max-retries`.
    pub fn get(&self, key: &str) -> Option<String> {
        let v = match key {
            "workers.max-workers" => self.workers.max_workers.to_string(),
            "workers.poll-interval" => format_duration(self.workers.poll_interval),
            "workers.shutdown-timeout" => format_duration(self.workers.shutdown_timeout),
            "retry.max-retries" => self.retry.max_retries.to_string(),
            "retry.base-delay" => format_duration(self.retry.base_delay),
            "retry.max-delay" => format_duration(self.retry.max_delay),
            "retry.jitter" => self.retry.jitter.to_string(),
            "jobs.default-timeout" => format_duration(self.jobs.default_timeout),
            "jobs.cleanup-completed-after" => format_duration(self.jobs.cleanup_completed_after),
            "jobs.cleanup-failed-after" => format_duration(self.jobs.cleanup_failed_after),
            _ => return None,
        };
        Some(v)
    }

    /// Set a value by its dotted key. Durations accept `30s`, `5m`, `2h`,
    /// `7d` or a bare number of seconds.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "workers.max-workers" => self.workers.max_workers = parse_number(key, value)?,
            "workers.poll-interval" => self.workers.poll_interval = parse_duration(value)?,
            "workers.shutdown-timeout" => self.workers.shutdown_timeout = parse_duration(value)?,
            "retry.max-retries" => self.retry.max_retries = parse_number(key, value)?,
            "retry.base-delay" => self.retry.base_delay = parse_duration(value)?,
            "retry.max-delay" => self.retry.max_delay = parse_duration(value)?,
            "retry.jitter" => {
                let j: f64 = value.parse().map_err(|_| {
                    QueueError::InvalidValue(format!("{key}: expected a number, got {value:?}"))
                })?;
                if !(0.0..=1.0).contains(&j) {
                    return Err(QueueError::InvalidValue(format!(
                        "{key}: jitter must be within [0, 1]"
                    )));
                }
                self.retry.jitter = j;
            }
            "jobs.default-timeout" => self.jobs.default_timeout = parse_duration(value)?,
            "jobs.cleanup-completed-after" => {
                self.jobs.cleanup_completed_after = parse_duration(value)?
            }
            "jobs.cleanup-failed-after" => self.jobs.cleanup_failed_after = parse_duration(value)?,
            _ => {
                return Err(QueueError::InvalidValue(format!(
                    "unknown configuration key: {key}"
                )))
            }
        }
        Ok(())
    }

    /// All keys and their current values, in a stable order.
    pub fn entries(&self) -> Vec<(String, String)> {
        const KEYS: &[&str] = &[
            "workers.max-workers",
            "workers.poll-interval",
            "workers.shutdown-timeout",
            "retry.max-retries",
            "retry.base-delay",
            "retry.max-delay",
            "retry.jitter",
            "jobs.default-timeout",
            "jobs.cleanup-completed-after",
            "jobs.cleanup-failed-after",
        ];
        KEYS.iter()
            .map(|k| (k.to_string(), self.get(k).unwrap_or_default()))
            .collect()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        QueueError::InvalidValue(format!("{key}: expected a number, got {value:?}"))
    })
}

/// Parse `30s` / `5m` / `2h` / `7d`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => value.split_at(pos),
        None => (value, ""),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| QueueError::InvalidValue(format!("invalid duration: {value:?}")))?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => {
            return Err(QueueError::InvalidValue(format!(
                "invalid duration unit in {value:?} (expected s, m, h or d)"
            )))
        }
    };
    Ok(Duration::from_secs(secs))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.workers.max_workers, 5);
        assert_eq!(config.workers.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(300));
        assert_eq!(config.jobs.default_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let mut config = QueueConfig::default();
        config.set("retry.max-retries", "7").unwrap();
        config.set("retry.base-delay", "2s").unwrap();
        config.set("workers.max-workers", "12").unwrap();

        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.get("workers.max-workers").as_deref(), Some("12"));
        assert_eq!(config.get("retry.base-delay").as_deref(), Some("2s"));
    }

    #[test]
    fn test_set_rejects_unknown_key_and_bad_values() {
        let mut config = QueueConfig::default();
        assert!(config.set("retry.nope", "1").is_err());
        assert!(config.set("retry.max-retries", "many").is_err());
        assert!(config.set("retry.jitter", "1.5").is_err());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut config = QueueConfig::default();
        config.set("workers.max-workers", "99").unwrap();
        config.reset();
        assert_eq!(config.workers.max_workers, 5);
    }

    #[test]
    fn test_entries_lists_all_keys() {
        let config = QueueConfig::default();
        let entries = config.entries();
        assert_eq!(entries.len(), 10);
        assert!(entries.iter().all(|(_, v)| !v.is_empty()));
    }
}
