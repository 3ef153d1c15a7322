//! Portable aggregation state.
//!
//! A `Continuation` captures where each provider stands so a session can be
//! dropped between requests and rebuilt later. Buffered items are not stored:
//! a provider with a partially emitted buffer is recorded at the cursor that
//! produced that buffer, plus how many of its items were already emitted.
//! Resuming refetches at that cursor and discards the emitted prefix.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{AggregatorConfig, AggregatorError, FederatedAggregator, Page, Result};
use crate::interfaces::order::ItemOrder;
use crate::interfaces::provider::{Cursor, Provider};

const CONTINUATION_VERSION: u32 = 1;

/// One provider's resumable position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPosition {
    pub name: String,
    /// Cursor for the next fetch; absent means the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    /// Items to discard from the fetch at `cursor`.
    #[serde(default)]
    pub skip: usize,
    pub has_more: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// Serializable snapshot of an aggregation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    version: u32,
    providers: Vec<ProviderPosition>,
}

impl Continuation {
    pub fn providers(&self) -> &[ProviderPosition] {
        &self.providers
    }

    /// Opaque, URL-safe token.
    pub fn encode(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| AggregatorError::InvalidContinuation(e.to_string()))?;
        let continuation: Continuation = serde_json::from_slice(&bytes)
            .map_err(|e| AggregatorError::InvalidContinuation(e.to_string()))?;

        if continuation.version != CONTINUATION_VERSION {
            return Err(AggregatorError::InvalidContinuation(format!(
                "unsupported version {}",
                continuation.version
            )));
        }
        Ok(continuation)
    }
}

impl FederatedAggregator {
    /// Capture the session's position.
    pub fn continuation(&self) -> Continuation {
        let providers = self
            .slots
            .iter()
            .map(|slot| {
                if slot.buffer.is_empty() {
                    ProviderPosition {
                        name: slot.provider.name().to_string(),
                        cursor: slot.next.clone(),
                        skip: slot.skip,
                        has_more: slot.has_more,
                        failed: slot.failed,
                        consecutive_failures: slot.consecutive_failures,
                    }
                } else {
                    ProviderPosition {
                        name: slot.provider.name().to_string(),
                        cursor: slot.origin.clone(),
                        skip: slot.consumed,
                        has_more: true,
                        failed: slot.failed,
                        consecutive_failures: slot.consecutive_failures,
                    }
                }
            })
            .collect();

        Continuation {
            version: CONTINUATION_VERSION,
            providers,
        }
    }

    /// Rebuild a session from `continuation`.
    ///
    /// `providers` must match the continuation by name and position.
    pub fn resume(
        providers: Vec<Arc<dyn Provider>>,
        order: Arc<dyn ItemOrder>,
        config: AggregatorConfig,
        continuation: &Continuation,
    ) -> Result<Self> {
        if providers.len() != continuation.providers.len() {
            return Err(AggregatorError::ProviderSetMismatch(format!(
                "expected {} providers, got {}",
                continuation.providers.len(),
                providers.len()
            )));
        }
        for (provider, position) in providers.iter().zip(&continuation.providers) {
            if provider.name() != position.name {
                return Err(AggregatorError::ProviderSetMismatch(format!(
                    "expected provider '{}', got '{}'",
                    position.name,
                    provider.name()
                )));
            }
        }

        let mut aggregator = Self::new(providers, order, config)?;
        for (slot, position) in aggregator.slots.iter_mut().zip(&continuation.providers) {
            slot.next = position.cursor.clone();
            slot.skip = position.skip;
            slot.has_more = position.has_more;
            slot.failed = position.failed;
            slot.consecutive_failures = position.consecutive_failures;
        }
        Ok(aggregator)
    }
}

/// Stateless page request.
///
/// Loads one page starting from `continuation` (or the beginning) and returns
/// it with the token for the following page. The token is `None` once the
/// feed is done.
pub async fn fetch_page(
    providers: Vec<Arc<dyn Provider>>,
    order: Arc<dyn ItemOrder>,
    config: AggregatorConfig,
    continuation: Option<&str>,
) -> Result<(Page, Option<String>)> {
    let mut aggregator = match continuation {
        Some(token) => {
            let continuation = Continuation::decode(token)?;
            FederatedAggregator::resume(providers, order, config, &continuation)?
        }
        None => FederatedAggregator::new(providers, order, config)?,
    };

    let page = aggregator.load_next_page().await;
    let next = if page.done {
        None
    } else {
        Some(aggregator.continuation().encode())
    };
    Ok((page, next))
}
