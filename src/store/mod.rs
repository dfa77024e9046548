pub mod jobs;
pub mod output;

pub use jobs::{JobStore, ListFilter};
pub use output::{CapturedOutput, OutputStore};

use crate::error::Result;
use std::path::Path;

/// Open the backing sled database shared by the job and output stores.
///
/// Writes are flushed in the background; the stores also flush on drop.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<sled::Db> {
    let db = sled::Config::new()
        .path(path)
        .cache_capacity(64 * 1024 * 1024)
        .flush_every_ms(Some(100))
        .mode(sled::Mode::HighThroughput)
        .open()?;
    Ok(db)
}
