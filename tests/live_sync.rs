//! End-to-end tests: paged aggregation into a materialized feed, kept in sync
//! by live events flowing through the bridge and the topic bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use braid::aggregator::AggregatorConfig;
use braid::bus::{signal_ready, wait_ready};
use braid::interfaces::order::NewestFirst;
use braid::interfaces::provider::Provider;
use braid::reconciler::FeedChange;
use braid::test_utils::{eventually, item_at, live_event, VecProvider};
use braid::{fetch_page, EventKind, FederatedAggregator, ItemIdentity, MaterializedFeed};

use common::{harness, ids, load_all, providers, ROOM, WAIT};

#[tokio::test]
async fn test_paged_feed_matches_full_sorted_merge() {
    let h = harness();
    load_all(&h.feed, providers(), 3).await;

    assert_eq!(ids(&h.feed), vec!["c5", "p4", "c3", "p2", "c1"]);
}

#[tokio::test]
async fn test_live_events_patch_paged_feed() {
    let h = harness();
    load_all(&h.feed, providers(), 3).await;
    h.bridge.start_listen(ROOM).await.unwrap();
    let mut changes = h.feed.subscribe_changes();

    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "c9", ROOM, 9));
    assert!(eventually(WAIT, || h.feed.len() == 6).await);
    assert_eq!(ids(&h.feed)[0], "c9");
    assert_eq!(
        changes.recv().await.unwrap(),
        FeedChange::Inserted {
            identity: ItemIdentity::new("comment", "c9"),
            index: 0
        }
    );

    // Newer timestamp moves c3 to the front.
    h.transport
        .emit_event(&live_event(EventKind::Updated, "comment", "c3", ROOM, 30));
    assert!(eventually(WAIT, || {
        h.feed
            .get(&ItemIdentity::new("comment", "c3"))
            .is_some_and(|i| i.payload["t"] == 30)
    })
    .await);

    h.transport
        .emit_event(&live_event(EventKind::Deleted, "comment", "c1", ROOM, 0));
    assert!(eventually(WAIT, || h.feed.len() == 5).await);
    assert_eq!(ids(&h.feed), vec!["c3", "c9", "c5", "p4", "p2"]);
}

#[tokio::test]
async fn test_created_event_racing_a_fetch_is_not_duplicated() {
    let h = harness();
    h.bridge.start_listen(ROOM).await.unwrap();

    // Push arrives before the page carrying the same item.
    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "c5", ROOM, 5));
    assert!(eventually(WAIT, || h.feed.len() == 1).await);

    load_all(&h.feed, providers(), 2).await;
    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "c3", ROOM, 3));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(ids(&h.feed), vec!["c5", "p4", "c3", "p2", "c1"]);
}

#[tokio::test]
async fn test_replayed_delete_leaves_feed_unchanged() {
    let h = harness();
    load_all(&h.feed, providers(), 5).await;
    h.bridge.start_listen(ROOM).await.unwrap();

    h.transport
        .emit_event(&live_event(EventKind::Deleted, "comment", "c5", ROOM, 0));
    assert!(eventually(WAIT, || h.feed.len() == 4).await);
    let after_first = h.feed.snapshot();

    h.transport
        .emit_event(&live_event(EventKind::Deleted, "comment", "c5", ROOM, 0));
    assert!(eventually(WAIT, || h.reconciler.conflict_count() == 1).await);
    assert_eq!(h.feed.snapshot(), after_first);
}

#[tokio::test]
async fn test_no_mutation_after_stop_listen() {
    let h = harness();
    load_all(&h.feed, providers(), 5).await;
    h.bridge.start_listen(ROOM).await.unwrap();
    let before = h.feed.snapshot();

    h.bridge.stop_listen().await;
    assert_eq!(h.transport.open_channel_count(), 0);

    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "c9", ROOM, 9));
    h.transport
        .emit_event(&live_event(EventKind::Deleted, "comment", "c5", ROOM, 0));
    // Even a message already on the bus is refused once the gate is closed.
    h.bus.publish(
        "comment:deleted",
        live_event(EventKind::Deleted, "comment", "c3", ROOM, 0),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.feed.snapshot(), before);
}

#[tokio::test]
async fn test_scope_switch_ignores_old_scope() {
    let h = harness();
    h.bridge.start_listen(ROOM).await.unwrap();
    h.bridge.start_listen("room-2").await.unwrap();
    assert_eq!(h.transport.open_channel_count(), 1);

    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "old", ROOM, 1));
    h.transport
        .emit_event(&live_event(EventKind::Created, "comment", "new", "room-2", 2));

    assert!(eventually(WAIT, || h.feed.len() == 1).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ids(&h.feed), vec!["new"]);
}

#[tokio::test]
async fn test_recovered_provider_items_land_in_order() {
    let h = harness();
    let posts = VecProvider::new("posts", vec![item_at("post", "p4", 4)]);
    posts.fail_next(1);
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(VecProvider::new(
            "comments",
            vec![item_at("comment", "c5", 5), item_at("comment", "c1", 1)],
        )) as Arc<dyn Provider>,
        Arc::new(posts),
    ];
    let mut aggregator = FederatedAggregator::new(
        providers,
        Arc::new(NewestFirst),
        AggregatorConfig::default().with_page_size(10),
    )
    .unwrap();

    let first = aggregator.load_next_page().await;
    assert_eq!(first.degraded.len(), 1);
    assert_eq!(first.items.len(), 2);
    h.feed.append_page(first.items);

    let second = aggregator.load_next_page().await;
    assert!(second.done);
    assert_eq!(second.items.len(), 1);
    h.feed.append_page(second.items);

    assert_eq!(ids(&h.feed), vec!["c5", "p4", "c1"]);
}

#[tokio::test]
async fn test_stateless_requests_build_the_same_feed() {
    let feed = MaterializedFeed::new(Arc::new(NewestFirst), 8);
    let mut token: Option<String> = None;

    for _ in 0..20 {
        let (page, next) = fetch_page(
            providers(),
            Arc::new(NewestFirst),
            AggregatorConfig::default().with_page_size(2),
            token.as_deref(),
        )
        .await
        .unwrap();
        feed.append_page(page.items);
        token = next;
        if token.is_none() {
            break;
        }
    }

    assert_eq!(ids(&feed), vec!["c5", "p4", "c3", "p2", "c1"]);
}

#[tokio::test]
async fn test_consumer_waits_for_bridge_readiness() {
    let h = harness();
    let waiter = wait_ready(&h.bus, "live-bridge");

    let bridge_ready = async {
        h.bridge.start_listen(ROOM).await.unwrap();
        signal_ready(&h.bus, "live-bridge");
    };
    let (_, ready) = tokio::join!(bridge_ready, waiter.wait_timeout(Duration::from_secs(1)));

    assert!(ready.unwrap());
    assert!(h.bridge.gate().is_open_for(ROOM));
}
