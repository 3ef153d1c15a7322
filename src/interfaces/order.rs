//! Feed order.
//!
//! A total order over `MaterializedItem`s, injected into the aggregator and the
//! reconciler so both place items identically.

use std::cmp::Ordering;

use crate::model::MaterializedItem;

/// Total order over feed items.
///
/// Returning `Equal` is allowed; callers break ties deterministically
/// (provider registration order, then item identity).
pub trait ItemOrder: Send + Sync {
    fn compare(&self, a: &MaterializedItem, b: &MaterializedItem) -> Ordering;
}

impl<F> ItemOrder for F
where
    F: Fn(&MaterializedItem, &MaterializedItem) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &MaterializedItem, b: &MaterializedItem) -> Ordering {
        (self)(a, b)
    }
}

/// Descending timestamp: newest items first.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestFirst;

impl ItemOrder for NewestFirst {
    fn compare(&self, a: &MaterializedItem, b: &MaterializedItem) -> Ordering {
        b.timestamp.cmp(&a.timestamp)
    }
}

/// Ascending timestamp: oldest items first.
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl ItemOrder for OldestFirst {
    fn compare(&self, a: &MaterializedItem, b: &MaterializedItem) -> Ordering {
        a.timestamp.cmp(&b.timestamp)
    }
}

/// Full comparison used for placement: the order, then identity.
pub(crate) fn compare_with_identity(
    order: &dyn ItemOrder,
    a: &MaterializedItem,
    b: &MaterializedItem,
) -> Ordering {
    order
        .compare(a, b)
        .then_with(|| a.identity.cmp(&b.identity))
}
