use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const OUTPUT_PREFIX: &str = "outputs:";

/// Captured stdout/stderr of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub job_id: String,
    pub attempt: u32,
    pub stdout: String,
    pub stderr: String,
    pub captured_at: DateTime<Utc>,
}

/// Blob storage for command output, shared with the job store's database.
/// Jobs reference entries through an opaque `output_ref`.
pub struct OutputStore {
    db: sled::Db,
}

impl OutputStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Persist one attempt's output and return the reference to hand back to
    /// the job record.
    pub fn store(&self, job_id: &str, attempt: u32, stdout: &str, stderr: &str) -> Result<String> {
        let output_ref = format!("{OUTPUT_PREFIX}{job_id}:{attempt}");
        let output = CapturedOutput {
            job_id: job_id.to_string(),
            attempt,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            captured_at: Utc::now(),
        };
        self.db.insert(&output_ref, bincode::serialize(&output)?)?;
        Ok(output_ref)
    }

    pub fn get(&self, output_ref: &str) -> Result<Option<CapturedOutput>> {
        match self.db.get(output_ref)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}
