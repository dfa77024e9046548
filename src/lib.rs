//! # Conveyor
//!
//! A persistent, multi-worker background job queue. Jobs describe a shell
//! command plus execution policy; workers claim them atomically, run them
//! with a timeout, retry failures under exponential backoff and park
//! permanently failing jobs in a dead-letter queue. Jobs survive process
//! crashes and are never executed by two workers at once; execution is
//! at-least-once across crashes.
//!
//! ```no_run
//! use conveyor::{
//!     CommandExecutor, JobSpec, JobStore, OutputStore, QueueConfig, QueueService, WorkerPool,
//! };
//! use std::sync::{Arc, RwLock};
//!
//! # async fn demo() -> conveyor::Result<()> {
//! let db = conveyor::store::open_db("conveyor.db")?;
//! let store = Arc::new(JobStore::new(db.clone())?);
//! let config = Arc::new(RwLock::new(QueueConfig::default()));
//!
//! let service = QueueService::new(store, config);
//! service.start().await?;
//!
//! let executor = Arc::new(CommandExecutor::new(Arc::new(OutputStore::new(db))));
//! let pool = WorkerPool::new(service.clone(), executor);
//! pool.start(2);
//!
//! let job = service.enqueue(JobSpec::new("echo hello"))?;
//! println!("enqueued {}", job.id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod service;
pub mod store;
pub mod worker;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use executor::{CommandExecutor, ExecutionOutcome};
pub use job::{ExecutionRecord, Job, JobPriority, JobSpec, JobState};
pub use pool::{PoolStatus, WorkerPool};
pub use retry::RetryPolicy;
pub use service::{QueueService, QueueStats};
pub use store::{JobStore, ListFilter, OutputStore};
pub use worker::{Worker, WorkerStatus};
