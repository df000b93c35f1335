//! Drains one backing store into another, for cross-datacenter or staging
//! handoffs.

use std::time::Duration;

use tracing::error;

use crate::error::DsqResult;
use crate::store::QueueStore;

/// Copies batches from `source` to `dest`. If `dest.put_many` fails midway,
/// the batch is restored to `source` and the error is propagated — the
/// operator must investigate before the forwarder is restarted.
pub struct Forwarder {
    source: QueueStore,
    dest: QueueStore,
    interval: Duration,
    batch_size: isize,
}

impl Forwarder {
    pub fn new(source: QueueStore, dest: QueueStore, interval: Duration, batch_size: isize) -> Self {
        Self {
            source,
            dest,
            interval,
            batch_size,
        }
    }

    /// Run until `should_stop` returns true between batches, or forever if
    /// never asked to stop.
    pub async fn run(&self, mut should_stop: impl FnMut() -> bool) -> DsqResult<()> {
        loop {
            let batch = self.source.take_many(self.batch_size).await?;
            if !batch.is_empty() {
                if let Err(e) = self.dest.put_many(&batch).await {
                    error!(error = %e, "forward error, restoring batch to source");
                    self.source.put_many(&batch).await?;
                    return Err(e);
                }
            } else {
                if should_stop() {
                    return Ok(());
                }
                tokio::time::sleep(self.interval).await;
            }
        }
    }
}
