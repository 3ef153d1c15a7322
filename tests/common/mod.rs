//! Shared harness for integration tests.
//!
//! Wires a bus, a mock push transport, a bridge and a gated reconciler the
//! way an application would. Fakes come from `braid::test_utils`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use braid::aggregator::AggregatorConfig;
use braid::bridge::BridgeConfig;
use braid::bus::{BusConfig, TopicBus};
use braid::interfaces::order::NewestFirst;
use braid::interfaces::provider::Provider;
use braid::interfaces::push_channel::PushTransport;
use braid::reconciler::BodyMaterializer;
use braid::test_utils::{item_at, MockPushTransport, VecProvider};
use braid::{FederatedAggregator, LiveChannelBridge, MaterializedFeed, Reconciler};

pub const WAIT: Duration = Duration::from_secs(2);
pub const ROOM: &str = "room-1";

pub struct Harness {
    pub bus: Arc<TopicBus>,
    pub transport: Arc<MockPushTransport>,
    pub bridge: LiveChannelBridge,
    pub feed: Arc<MaterializedFeed>,
    pub reconciler: Arc<Reconciler>,
}

/// Bridge for `comment` events feeding a newest-first feed.
pub fn harness() -> Harness {
    let bus = Arc::new(TopicBus::new(BusConfig::default()));
    let transport = Arc::new(MockPushTransport::new());
    let bridge = LiveChannelBridge::new(
        Arc::clone(&transport) as Arc<dyn PushTransport>,
        Arc::clone(&bus),
        BridgeConfig::with_entity_types(["comment"]),
    );
    let feed = Arc::new(MaterializedFeed::new(Arc::new(NewestFirst), 64));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&feed),
        Arc::new(BodyMaterializer::default()),
        bridge.gate(),
    ));
    reconciler.attach(&bus, "comment");

    Harness {
        bus,
        transport,
        bridge,
        feed,
        reconciler,
    }
}

pub fn ids(feed: &MaterializedFeed) -> Vec<String> {
    feed.snapshot().iter().map(|i| i.identity.id.clone()).collect()
}

/// Comments `c5,c3,c1` and posts `p4,p2`, each newest first.
pub fn providers() -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(VecProvider::new(
            "comments",
            vec![
                item_at("comment", "c5", 5),
                item_at("comment", "c3", 3),
                item_at("comment", "c1", 1),
            ],
        )) as Arc<dyn Provider>,
        Arc::new(VecProvider::new(
            "posts",
            vec![item_at("post", "p4", 4), item_at("post", "p2", 2)],
        )),
    ]
}

/// Page `providers` into `feed` until the aggregator is done.
pub async fn load_all(feed: &MaterializedFeed, providers: Vec<Arc<dyn Provider>>, page_size: usize) {
    let mut aggregator = FederatedAggregator::new(
        providers,
        Arc::new(NewestFirst),
        AggregatorConfig::default().with_page_size(page_size),
    )
    .unwrap();
    for _ in 0..20 {
        let page = aggregator.load_next_page().await;
        feed.append_page(page.items);
        if page.done {
            return;
        }
    }
    panic!("feed never finished");
}
