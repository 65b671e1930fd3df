use log::debug;

use crate::errors::ShmKvError;
use crate::queue::RequestQueue;
use crate::table::ShardedTable;

/// Drains the ring until the shutdown coordinator stops it, applying each
/// request to the table. Returns how many requests this worker processed.
pub fn run_worker(
    queue: &RequestQueue,
    table: &ShardedTable<String, String>,
) -> Result<u64, ShmKvError> {
    let mut processed = 0u64;
    while let Some(request) = queue.dequeue()? {
        table.apply(&request)?;
        processed += 1;
    }
    debug!("worker drained {} requests", processed);
    Ok(processed)
}
