//! Promotes delayed tasks from the schedule sorted set to their ready
//! queues once their eta elapses.

use std::time::Duration;

use tracing::debug;

use crate::error::DsqResult;
use crate::store::QueueStore;

/// How often [`Scheduler::run`] calls [`QueueStore::reschedule`].
const TICK: Duration = Duration::from_secs(1);

/// Safe to run multiple instances of: promotion is idempotent because
/// `ZREMRANGEBYSCORE` hands each due member to exactly one caller.
pub struct Scheduler {
    queue: QueueStore,
}

impl Scheduler {
    pub fn new(queue: QueueStore) -> Self {
        Self { queue }
    }

    /// Promote due entries every [`TICK`]. In burst mode, stop once a
    /// promotion pass finds nothing left pending.
    pub async fn run(&self, burst: bool) -> DsqResult<()> {
        loop {
            let remaining = self.queue.reschedule(None).await?;
            debug!(remaining, "reschedule pass");
            if burst && remaining == 0 {
                return Ok(());
            }
            tokio::time::sleep(TICK).await;
        }
    }
}
