use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::Publisher;
use crate::storage::TaskStore;
use crate::util::{UnixMillis, unix_millis};

/// Periodic drain loop: every tick, pops all tasks whose due-time has
/// elapsed and hands their payloads to the publisher, in batch order.
///
/// Runs as a single task, so ticks cannot overlap. A failed publish is
/// logged and the task is not re-enqueued.
pub struct Ticker {
    store: Arc<TaskStore>,
    publisher: Arc<dyn Publisher>,
    period: Duration,
    shutdown: CancellationToken,
}

impl Ticker {
    pub fn new(
        store: Arc<TaskStore>,
        publisher: Arc<dyn Publisher>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            publisher,
            period,
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut ticks = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticks.tick() => self.drain_due(unix_millis()).await,
            }
        }
        tracing::debug!("ticker stopped");
    }

    async fn drain_due(&self, now: UnixMillis) {
        let batch = match self.store.pop_lesser_than(now).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "failed to pop due tasks");
                return;
            }
        };

        for task in batch {
            if let Err(err) = self.publisher.publish(&task.payload).await {
                tracing::error!(error = %err, id = %task.id, "failed to publish due task");
            }
        }
    }
}
