//! braid-feed: page through a fixture feed
//!
//! Builds in-memory providers from a JSON fixture, aggregates them newest
//! first and prints each page as one JSON line until the feed is done.
//!
//! ## Usage
//! ```text
//! braid-feed <fixture.json> [--config <path>]
//! ```
//!
//! ## Fixture
//! ```json
//! {"providers": [{"name": "posts", "items": [
//!   {"identity": {"object_type": "post", "id": "1"},
//!    "timestamp": "2024-01-01T00:00:00Z", "payload": {}}
//! ]}]}
//! ```
//!
//! ## Configuration
//! - BRAID_CONFIG or `--config`: YAML configuration file
//! - BRAID__AGGREGATOR__PAGE_SIZE: items per page
//! - BRAID_LOG: log filter (logs go to stderr)

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use braid::config::Config;
use braid::interfaces::order::{ItemOrder, NewestFirst};
use braid::interfaces::provider::{Cursor, FetchPage, Provider, Result as ProviderResult};
use braid::{FederatedAggregator, MaterializedItem};

#[derive(Debug, Deserialize)]
struct Fixture {
    providers: Vec<FixtureProvider>,
}

#[derive(Debug, Deserialize)]
struct FixtureProvider {
    name: String,
    #[serde(default)]
    items: Vec<MaterializedItem>,
}

/// Offset-paginated provider over fixture items.
struct StaticProvider {
    name: String,
    items: Vec<MaterializedItem>,
}

impl StaticProvider {
    fn new(fixture: FixtureProvider, order: &dyn ItemOrder) -> Self {
        let mut items = fixture.items;
        items.sort_by(|a, b| order.compare(a, b));
        Self {
            name: fixture.name,
            items,
        }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, cursor: Option<&Cursor>, page_size: usize) -> ProviderResult<FetchPage> {
        let start = cursor
            .and_then(Cursor::as_offset)
            .unwrap_or(0)
            .min(self.items.len());
        let end = (start + page_size).min(self.items.len());
        let page = self.items[start..end].to_vec();

        if end < self.items.len() {
            Ok(FetchPage::more(page, Cursor::from_offset(end)))
        } else {
            Ok(FetchPage::last(page))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    braid::utils::bootstrap::init_tracing();

    let config_path = braid::utils::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let fixture_path = braid::utils::bootstrap::positional_args()
        .into_iter()
        .next()
        .ok_or("usage: braid-feed <fixture.json> [--config <path>]")?;
    let fixture: Fixture = serde_json::from_str(&std::fs::read_to_string(&fixture_path)?)?;

    let order = Arc::new(NewestFirst);
    let providers: Vec<Arc<dyn Provider>> = fixture
        .providers
        .into_iter()
        .map(|p| Arc::new(StaticProvider::new(p, order.as_ref())) as Arc<dyn Provider>)
        .collect();

    info!(
        fixture = %fixture_path,
        providers = providers.len(),
        page_size = config.aggregator.page_size,
        "Starting braid-feed"
    );

    let mut aggregator = FederatedAggregator::new(providers, order, config.aggregator)?;
    let mut number = 0usize;
    loop {
        let page = aggregator.load_next_page().await;
        number += 1;

        let degraded: Vec<&str> = page.degraded.iter().map(|d| d.name.as_str()).collect();
        let line = serde_json::json!({
            "page": number,
            "items": page.items,
            "done": page.done,
            "degraded": degraded,
        });
        println!("{}", line);

        if page.done {
            break;
        }
    }

    info!(pages = number, "Feed complete");
    Ok(())
}
