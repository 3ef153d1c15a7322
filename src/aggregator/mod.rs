//! Federated aggregation of paginated providers.
//!
//! Presents several independently paginated providers as one globally ordered
//! feed. Each provider gets a slot holding its cursor, the buffered items it
//! returned but that have not been emitted yet, and its exhaustion/failure
//! state. A page request refills empty buffers with at most one fetch per
//! provider (fan-out in parallel), then k-way merges the buffers.
//!
//! Merge rule: an item is emitted only while every participating provider
//! has a buffered head to compare it against. When a provider's buffer drains
//! and it may still have more, the page ends early and the next request
//! refills it. Providers that failed this round do not participate; their
//! items join later rounds.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::interfaces::order::ItemOrder;
use crate::interfaces::provider::{Cursor, FetchPage, Provider, ProviderError};
use crate::model::MaterializedItem;

pub mod continuation;

pub use continuation::{fetch_page, Continuation};

// ============================================================================
// Types
// ============================================================================

/// Result type for aggregator operations.
pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Errors from aggregator operations.
///
/// Provider failures are never reported here; they degrade the page instead.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Page request cancelled")]
    Cancelled,

    #[error("Invalid continuation: {0}")]
    InvalidContinuation(String),

    #[error("Continuation does not match provider set: {0}")]
    ProviderSetMismatch(String),

    #[error("Page size must be greater than zero")]
    InvalidPageSize,
}

/// Provider state within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// May still yield items.
    Active,
    /// Reported no more items and its buffer is drained.
    Exhausted,
    /// Excluded for the rest of the session.
    Failed,
}

/// A provider that did not contribute normally to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedProvider {
    pub name: String,
    pub reason: String,
    /// The provider is excluded from future rounds.
    pub permanent: bool,
}

/// One page of the aggregated feed.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<MaterializedItem>,
    /// Every provider is exhausted or failed and nothing remains buffered.
    pub done: bool,
    /// Providers that failed this round or are permanently failed.
    pub degraded: Vec<DegradedProvider>,
}

impl Page {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Aggregator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Items per page.
    pub page_size: usize,
    /// Upper bound on a single provider fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Consecutive failed rounds after which a provider is excluded.
    pub max_consecutive_failures: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            fetch_timeout_ms: 10_000,
            max_consecutive_failures: 3,
        }
    }
}

impl AggregatorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

// ============================================================================
// Slots
// ============================================================================

/// One provider's fetch for a round: slot index, cursor used, result.
type FetchOutcome = (usize, Option<Cursor>, std::result::Result<FetchPage, ProviderError>);

/// Per-provider session state.
pub(crate) struct ProviderSlot {
    pub(crate) provider: Arc<dyn Provider>,
    /// Cursor that produced the current buffer.
    pub(crate) origin: Option<Cursor>,
    /// Cursor for the next fetch.
    pub(crate) next: Option<Cursor>,
    pub(crate) buffer: VecDeque<MaterializedItem>,
    /// Items already emitted from the current buffer.
    pub(crate) consumed: usize,
    /// Items to discard from the next successful fetch (continuation resume).
    pub(crate) skip: usize,
    pub(crate) has_more: bool,
    pub(crate) failed: bool,
    pub(crate) consecutive_failures: u32,
}

impl ProviderSlot {
    fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            origin: None,
            next: None,
            buffer: VecDeque::new(),
            consumed: 0,
            skip: 0,
            has_more: true,
            failed: false,
            consecutive_failures: 0,
        }
    }

    fn name(&self) -> &str {
        self.provider.name()
    }

    fn status(&self) -> ProviderStatus {
        if self.failed {
            ProviderStatus::Failed
        } else if !self.has_more && self.buffer.is_empty() {
            ProviderStatus::Exhausted
        } else {
            ProviderStatus::Active
        }
    }

    /// Still expected to yield items but has nothing buffered.
    fn needs_fetch(&self) -> bool {
        !self.failed && self.has_more && self.buffer.is_empty()
    }

    fn is_settled(&self) -> bool {
        self.buffer.is_empty() && (self.failed || !self.has_more)
    }

    fn accept(&mut self, cursor: Option<Cursor>, page: FetchPage) {
        let mut items: VecDeque<MaterializedItem> = page.items.into();
        let skipped = self.skip.min(items.len());
        items.drain(..skipped);

        self.origin = cursor;
        self.consumed = skipped;
        self.skip = 0;
        self.buffer = items;
        self.has_more = page.has_more;
        self.next = page.next_cursor;
        self.consecutive_failures = 0;

        if self.has_more && self.next.is_none() {
            warn!(
                provider = %self.provider.name(),
                "Provider reported more items without a cursor, treating as exhausted"
            );
            self.has_more = false;
        }
    }

    /// Record a failed round. Returns `true` if the provider is now excluded.
    fn reject(&mut self, error: &ProviderError, max_consecutive_failures: u32) -> bool {
        self.consecutive_failures += 1;
        if error.is_permanent() || self.consecutive_failures >= max_consecutive_failures {
            self.failed = true;
        }
        self.failed
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Merges providers into one ordered, paged feed.
///
/// One instance is one aggregation session. `load_next_page` takes `&mut self`,
/// so a session has a single caller at a time; wrap it in a
/// `tokio::sync::Mutex` to share it.
pub struct FederatedAggregator {
    pub(crate) slots: Vec<ProviderSlot>,
    order: Arc<dyn ItemOrder>,
    config: AggregatorConfig,
}

impl FederatedAggregator {
    /// Create a session over `providers`, in registration order.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        order: Arc<dyn ItemOrder>,
        config: AggregatorConfig,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(AggregatorError::InvalidPageSize);
        }

        debug!(
            providers = providers.len(),
            page_size = config.page_size,
            "Aggregation session created"
        );

        Ok(Self {
            slots: providers.into_iter().map(ProviderSlot::new).collect(),
            order,
            config,
        })
    }

    /// Status of each provider, in registration order.
    pub fn provider_status(&self) -> Vec<(String, ProviderStatus)> {
        self.slots
            .iter()
            .map(|slot| (slot.name().to_string(), slot.status()))
            .collect()
    }

    /// `true` once every provider is exhausted or failed and nothing is buffered.
    pub fn is_done(&self) -> bool {
        self.slots.iter().all(ProviderSlot::is_settled)
    }

    /// Load the next page.
    pub async fn load_next_page(&mut self) -> Page {
        let never = CancellationToken::new();
        match self.load_next_page_with(&never).await {
            Ok(page) => page,
            // The token above is never cancelled.
            Err(_) => Page::default(),
        }
    }

    /// Load the next page, aborting if `cancel` fires.
    ///
    /// On cancellation the session is left exactly as it was before the call.
    #[tracing::instrument(name = "aggregator.load_next_page", skip_all, fields(page_size = self.config.page_size))]
    pub async fn load_next_page_with(&mut self, cancel: &CancellationToken) -> Result<Page> {
        let results = self.fetch_round(cancel).await?;
        let (degraded, sat_out) = self.apply_round(results);
        let items = self.merge(&sat_out);
        let done = self.is_done();

        debug!(
            items = items.len(),
            done,
            degraded = degraded.len(),
            "Page loaded"
        );

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, AGGREGATOR_PAGES};
            let outcome = if degraded.is_empty() { "complete" } else { "degraded" };
            AGGREGATOR_PAGES.add(1, &[metrics::outcome_attr(outcome)]);
        }

        Ok(Page {
            items,
            done,
            degraded,
        })
    }

    /// Fetch every slot that needs a refill, in parallel.
    ///
    /// Works on cloned cursors so nothing is mutated until all fetches finish.
    async fn fetch_round(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchOutcome>> {
        let page_size = self.config.page_size;
        let timeout = self.config.fetch_timeout();

        let fetches = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.needs_fetch())
            .map(|(index, slot)| {
                let provider = Arc::clone(&slot.provider);
                let cursor = slot.next.clone();
                async move {
                    let fetch = provider.fetch(cursor.as_ref(), page_size);
                    let result = match tokio::time::timeout(timeout, fetch).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Fetch(format!(
                            "fetch timed out after {:?}",
                            timeout
                        ))),
                    };
                    (index, cursor, result)
                }
            });

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Page request cancelled, session unchanged");
                Err(AggregatorError::Cancelled)
            }
            results = join_all(fetches) => Ok(results),
        }
    }

    /// Fold fetch results into the slots.
    ///
    /// Returns the degraded providers and, per slot, whether it failed this round.
    fn apply_round(
        &mut self,
        results: Vec<FetchOutcome>,
    ) -> (Vec<DegradedProvider>, Vec<bool>) {
        let mut degraded = Vec::new();
        let mut failed_this_round = vec![false; self.slots.len()];

        for (index, cursor, result) in results {
            let slot = &mut self.slots[index];
            match result {
                Ok(page) => {
                    debug!(
                        provider = %slot.name(),
                        items = page.items.len(),
                        has_more = page.has_more,
                        "Provider page fetched"
                    );
                    slot.accept(cursor, page);
                }
                Err(e) => {
                    failed_this_round[index] = true;
                    let permanent = slot.reject(&e, self.config.max_consecutive_failures);
                    if permanent {
                        info!(
                            provider = %slot.name(),
                            error = %e,
                            attempts = slot.consecutive_failures,
                            "Provider excluded from session"
                        );
                    } else {
                        warn!(
                            provider = %slot.name(),
                            error = %e,
                            attempts = slot.consecutive_failures,
                            "Provider fetch failed, will retry next page"
                        );
                    }

                    #[cfg(feature = "otel")]
                    {
                        use crate::utils::metrics::{self, PROVIDER_FETCH_FAILURES};
                        PROVIDER_FETCH_FAILURES.add(1, &[metrics::provider_attr(slot.name())]);
                    }

                    degraded.push(DegradedProvider {
                        name: slot.name().to_string(),
                        reason: e.to_string(),
                        permanent,
                    });
                }
            }
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.failed && !failed_this_round[index] {
                degraded.push(DegradedProvider {
                    name: slot.name().to_string(),
                    reason: "excluded after earlier failures".to_string(),
                    permanent: true,
                });
            }
        }

        (degraded, failed_this_round)
    }

    /// K-way merge of the buffered heads, up to one page.
    ///
    /// Slots flagged in `sat_out` failed this round and do not hold the merge back.
    fn merge(&mut self, sat_out: &[bool]) -> Vec<MaterializedItem> {
        let page_size = self.config.page_size;
        let mut items = Vec::with_capacity(page_size);

        while items.len() < page_size {
            let pending = self
                .slots
                .iter()
                .enumerate()
                .any(|(index, slot)| !sat_out[index] && slot.needs_fetch());
            if pending {
                break;
            }

            let Some(best) = self.best_head() else {
                break;
            };

            let slot = &mut self.slots[best];
            if let Some(item) = slot.buffer.pop_front() {
                slot.consumed += 1;
                items.push(item);
            }
        }

        items
    }

    /// Index of the slot whose head sorts first.
    ///
    /// Ties fall to registration order, then identity.
    fn best_head(&self) -> Option<usize> {
        let mut best: Option<(usize, &MaterializedItem)> = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let Some(head) = slot.buffer.front() else {
                continue;
            };
            best = match best {
                None => Some((index, head)),
                Some((best_index, best_head)) => {
                    let ordering = self
                        .order
                        .compare(head, best_head)
                        .then(index.cmp(&best_index))
                        .then_with(|| head.identity.cmp(&best_head.identity));
                    if ordering == Ordering::Less {
                        Some((index, head))
                    } else {
                        Some((best_index, best_head))
                    }
                }
            };
        }

        best.map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests;
