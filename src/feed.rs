use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::Bookmark;

/// A change to the bookmarks table, carrying the full record. Delivery to
/// subscribers is at-least-once and unordered relative to the request
/// completion that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert { record: Bookmark },
    Delete { record: Bookmark },
}

impl ChangeEvent {
    pub fn record(&self) -> &Bookmark {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Delete { record } => record,
        }
    }

    pub fn owner(&self) -> &str {
        &self.record().owner
    }
}

#[derive(Debug)]
pub enum FeedMessage {
    Event(ChangeEvent),
    /// The receiver fell behind the broadcast buffer and missed this many
    /// events. The view may have drifted; consumers reload from the store.
    Lagged(u64),
    Closed,
}

pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        ChangeFeed { tx }
    }

    /// Fire-and-forget fan-out; having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("change event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self, owner: &str) -> FeedSubscription {
        FeedSubscription {
            owner: owner.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions on the feed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One owner's slice of the feed. Dropping the value releases the
/// subscription.
pub struct FeedSubscription {
    owner: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl FeedSubscription {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Next event for this subscription's owner; foreign events are skipped
    /// silently.
    pub async fn next(&mut self) -> FeedMessage {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.owner() == self.owner => return FeedMessage::Event(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return FeedMessage::Lagged(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return FeedMessage::Closed,
            }
        }
    }
}
