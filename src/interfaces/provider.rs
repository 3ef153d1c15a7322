//! Provider interface for paginated data sources.
//!
//! Providers are stateless between calls: every fetch is driven entirely by
//! the cursor the caller hands in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::MaterializedItem;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors from provider fetches.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Recoverable for this round; the caller may retry next round.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The provider will not succeed again within this session.
    #[error("Provider permanently unavailable: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }
}

/// Opaque resume position handed out by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Cursor for offset-based providers.
    pub fn from_offset(offset: usize) -> Self {
        Self(offset.to_string())
    }

    /// Interpret the cursor as an offset, if it is one.
    pub fn as_offset(&self) -> Option<usize> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page returned by a provider.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    /// Items in the provider's own order (consistent with the feed order).
    pub items: Vec<MaterializedItem>,
    /// Cursor for the following page. Required when `has_more` is set.
    pub next_cursor: Option<Cursor>,
    /// Whether more items might exist past `next_cursor`.
    pub has_more: bool,
}

impl FetchPage {
    /// A page with more items after it.
    pub fn more(items: Vec<MaterializedItem>, next_cursor: Cursor) -> Self {
        Self {
            items,
            next_cursor: Some(next_cursor),
            has_more: true,
        }
    }

    /// The final page.
    pub fn last(items: Vec<MaterializedItem>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
        }
    }
}

/// A paginated data source (search results, membership lists, notifications).
///
/// Implementations must be safe to call repeatedly with monotonically
/// advancing cursors and must not assume the caller knows a total count.
/// No retries happen inside a provider; the aggregator decides when to call
/// again.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name, used in logs, degraded-provider reports and continuations.
    fn name(&self) -> &str;

    /// Fetch up to `page_size` items starting at `cursor` (`None` = start).
    async fn fetch(&self, cursor: Option<&Cursor>, page_size: usize) -> Result<FetchPage>;
}
