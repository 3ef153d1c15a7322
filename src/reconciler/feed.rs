//! The materialized feed held by a consumer.
//!
//! Single writer, many readers: readers take an `Arc` snapshot of the item
//! vector, writers copy-on-write under a lock held for one mutation.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::interfaces::order::{compare_with_identity, ItemOrder};
use crate::model::{ItemIdentity, MaterializedItem};

/// A change applied to a `MaterializedFeed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedChange {
    Inserted { identity: ItemIdentity, index: usize },
    Replaced { identity: ItemIdentity, index: usize },
    Removed { identity: ItemIdentity, index: usize },
    /// A page was merged in; `added` items were new.
    PageAppended { added: usize },
}

/// Ordered, identity-unique list of feed items.
pub struct MaterializedFeed {
    items: RwLock<Arc<Vec<MaterializedItem>>>,
    order: Arc<dyn ItemOrder>,
    changes: broadcast::Sender<FeedChange>,
}

impl MaterializedFeed {
    /// Create an empty feed. `change_capacity` bounds unread change
    /// notifications per receiver.
    pub fn new(order: Arc<dyn ItemOrder>, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            items: RwLock::new(Arc::new(Vec::new())),
            order,
            changes,
        }
    }

    /// Current contents. Later mutations do not affect the snapshot.
    pub fn snapshot(&self) -> Arc<Vec<MaterializedItem>> {
        Arc::clone(&self.items.read())
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn contains(&self, identity: &ItemIdentity) -> bool {
        self.items.read().iter().any(|item| &item.identity == identity)
    }

    pub fn get(&self, identity: &ItemIdentity) -> Option<MaterializedItem> {
        self.items
            .read()
            .iter()
            .find(|item| &item.identity == identity)
            .cloned()
    }

    /// Receive every subsequent change.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<FeedChange> {
        self.changes.subscribe()
    }

    /// Merge a page of items, skipping identities already present.
    ///
    /// Returns the number of items added.
    pub fn append_page(&self, page: impl IntoIterator<Item = MaterializedItem>) -> usize {
        let mut guard = self.items.write();
        let items = Arc::make_mut(&mut guard);
        let mut added = 0;

        for item in page {
            if items.iter().any(|existing| existing.identity == item.identity) {
                debug!(identity = %item.identity, "Paged item already present, skipped");
                continue;
            }
            let index = self.position_for(items, &item);
            items.insert(index, item);
            added += 1;
        }
        drop(guard);

        self.notify(FeedChange::PageAppended { added });
        added
    }

    /// Insert `item` at its ordered position. Returns `None` if its identity
    /// is already present.
    pub fn insert(&self, item: MaterializedItem) -> Option<usize> {
        let mut guard = self.items.write();
        if guard.iter().any(|existing| existing.identity == item.identity) {
            return None;
        }

        let items = Arc::make_mut(&mut guard);
        let index = self.position_for(items, &item);
        let identity = item.identity.clone();
        items.insert(index, item);
        drop(guard);

        self.notify(FeedChange::Inserted { identity, index });
        Some(index)
    }

    /// Replace the item with the same identity. Returns its new index, or
    /// `None` if absent.
    ///
    /// The item stays where it is unless its new sort key places it
    /// elsewhere, in which case it moves to its ordered position.
    pub fn replace(&self, item: MaterializedItem) -> Option<usize> {
        let mut guard = self.items.write();
        let current = guard
            .iter()
            .position(|existing| existing.identity == item.identity)?;

        let identity = item.identity.clone();
        let items = Arc::make_mut(&mut guard);
        items.remove(current);
        let index = self.position_for(items, &item);
        items.insert(index, item);
        drop(guard);

        if index != current {
            debug!(identity = %identity, from = current, to = index, "Updated item moved");
        }

        self.notify(FeedChange::Replaced { identity, index });
        Some(index)
    }

    /// Remove the item with `identity`. Returns `None` if absent.
    pub fn remove(&self, identity: &ItemIdentity) -> Option<usize> {
        let mut guard = self.items.write();
        let index = guard
            .iter()
            .position(|existing| &existing.identity == identity)?;

        Arc::make_mut(&mut guard).remove(index);
        drop(guard);

        self.notify(FeedChange::Removed {
            identity: identity.clone(),
            index,
        });
        Some(index)
    }

    fn position_for(&self, items: &[MaterializedItem], item: &MaterializedItem) -> usize {
        items.partition_point(|existing| {
            compare_with_identity(self.order.as_ref(), existing, item).is_lt()
        })
    }

    fn notify(&self, change: FeedChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }
}
