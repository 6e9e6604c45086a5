//! Media-group debounce: album messages arrive one by one and must be
//! processed as a single submission.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use easel_core::types::{MessageSnapshot, UserId};

const BATCH_CHANNEL_CAPACITY: usize = 256;

/// Identifies one media group. Telegram scopes group ids to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub chat_id: i64,
    pub media_group_id: String,
}

/// One completed submission, ready for orchestration.
#[derive(Debug, Clone)]
pub struct GroupBatch {
    pub user: UserId,
    pub chat_id: i64,
    pub snapshots: Vec<MessageSnapshot>,
}

struct GroupBucket {
    user: UserId,
    snapshots: Vec<MessageSnapshot>,
}

/// Buffers snapshots that share a media-group id and flushes each group as
/// one batch after a fixed quiet period.
///
/// The period is measured from the group's first message and later arrivals
/// never extend it, so a trickling group cannot stall its flush. Each group
/// flushes exactly once: the flush removes the bucket before sending, and a
/// flush that finds no bucket does nothing.
pub struct MediaGroupAggregator {
    buckets: DashMap<GroupKey, GroupBucket>,
    quiet_period: Duration,
    batch_tx: mpsc::Sender<GroupBatch>,
}

impl MediaGroupAggregator {
    /// Create the aggregator plus the receiving end of its batch channel.
    pub fn new(quiet_period: Duration) -> (Arc<Self>, mpsc::Receiver<GroupBatch>) {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let aggregator = Arc::new(Self {
            buckets: DashMap::new(),
            quiet_period,
            batch_tx,
        });
        (aggregator, batch_rx)
    }

    /// Add a snapshot to its group. The group's single flush timer starts
    /// with the first snapshot.
    pub fn submit(self: &Arc<Self>, key: GroupKey, user: UserId, snapshot: MessageSnapshot) {
        match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut bucket) => {
                bucket.get_mut().snapshots.push(snapshot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(GroupBucket {
                    user,
                    snapshots: vec![snapshot],
                });
                let aggregator = Arc::clone(self);
                tokio::spawn(async move {
                    aggregator.flush_after_quiet_period(key).await;
                });
            }
        }
    }

    async fn flush_after_quiet_period(&self, key: GroupKey) {
        tokio::time::sleep(self.quiet_period).await;

        let Some((_, bucket)) = self.buckets.remove(&key) else {
            return;
        };
        debug!(
            chat_id = key.chat_id,
            group = %key.media_group_id,
            snapshots = bucket.snapshots.len(),
            "media group complete"
        );
        let batch = GroupBatch {
            user: bucket.user,
            chat_id: key.chat_id,
            snapshots: bucket.snapshots,
        };
        if self.batch_tx.send(batch).await.is_err() {
            warn!("batch channel closed, media group dropped");
        }
    }
}
