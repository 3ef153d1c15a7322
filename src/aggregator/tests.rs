use super::*;
use crate::interfaces::order::NewestFirst;
use crate::test_utils::{item_at, items, VecProvider};

fn dyn_providers(providers: &[Arc<VecProvider>]) -> Vec<Arc<dyn Provider>> {
    providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn Provider>)
        .collect()
}

fn session(providers: &[Arc<VecProvider>], config: AggregatorConfig) -> FederatedAggregator {
    FederatedAggregator::new(dyn_providers(providers), Arc::new(NewestFirst), config).unwrap()
}

fn config(page_size: usize) -> AggregatorConfig {
    AggregatorConfig::default().with_page_size(page_size)
}

fn stamps(page: &Page) -> Vec<i64> {
    page.items.iter().map(|i| i.timestamp.timestamp()).collect()
}

/// Load pages until done, bounded so a bug cannot hang the test.
async fn drain(aggregator: &mut FederatedAggregator) -> Vec<Page> {
    let mut pages = Vec::new();
    for _ in 0..50 {
        let page = aggregator.load_next_page().await;
        let done = page.done;
        pages.push(page);
        if done {
            break;
        }
    }
    pages
}

#[test]
fn test_config_defaults() {
    let config = AggregatorConfig::default();
    assert_eq!(config.page_size, 20);
    assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
    assert_eq!(config.max_consecutive_failures, 3);
}

#[test]
fn test_zero_page_size_rejected() {
    let result = FederatedAggregator::new(Vec::new(), Arc::new(NewestFirst), config(0));
    assert!(matches!(result, Err(AggregatorError::InvalidPageSize)));
}

#[tokio::test]
async fn test_no_providers_is_done_immediately() {
    let mut aggregator = session(&[], config(5));
    let page = aggregator.load_next_page().await;

    assert!(page.items.is_empty());
    assert!(page.done);
}

#[tokio::test]
async fn test_two_providers_merge_across_pages() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3, 1])));
    let b = Arc::new(VecProvider::new("b", items("post", &[4, 2])));
    let mut aggregator = session(&[a, b], config(3));

    let first = aggregator.load_next_page().await;
    assert_eq!(stamps(&first), vec![5, 4, 3]);
    assert!(!first.done);
    assert!(!first.is_degraded());

    let second = aggregator.load_next_page().await;
    assert_eq!(stamps(&second), vec![2, 1]);
    assert!(second.done);
    assert!(aggregator.is_done());
}

#[tokio::test]
async fn test_buffered_items_are_not_refetched() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3, 1])));
    let b = Arc::new(VecProvider::new("b", items("post", &[4, 2])));
    let mut aggregator = session(&[Arc::clone(&a), Arc::clone(&b)], config(3));

    drain(&mut aggregator).await;

    assert_eq!(a.fetch_count(), 1);
    assert_eq!(b.fetch_count(), 1);
}

#[tokio::test]
async fn test_short_pages_end_page_early_and_keep_order() {
    let a = Arc::new(VecProvider::new("a", items("post", &[10, 8, 6, 4])).with_short_pages(1));
    let b = Arc::new(VecProvider::new("b", items("post", &[9, 7])));
    let mut aggregator = session(&[a, b], config(4));

    let pages = drain(&mut aggregator).await;

    assert_eq!(stamps(&pages[0]), vec![10]);
    assert_eq!(stamps(&pages[1]), vec![9, 8]);
    let all: Vec<i64> = pages.iter().flat_map(stamps).collect();
    assert_eq!(all, vec![10, 9, 8, 7, 6, 4]);
    assert!(pages.last().unwrap().done);
}

#[tokio::test]
async fn test_concatenated_pages_are_globally_sorted() {
    let a = Arc::new(VecProvider::new("a", items("post", &[99, 71, 70, 40, 12, 3])).with_short_pages(2));
    let b = Arc::new(VecProvider::new("b", items("comment", &[98, 50, 49, 48, 47, 1])).with_short_pages(3));
    let c = Arc::new(VecProvider::new("c", items("reaction", &[80, 60, 20])));
    let mut aggregator = session(&[a, b, c], config(4));

    let pages = drain(&mut aggregator).await;
    let all: Vec<i64> = pages.iter().flat_map(stamps).collect();

    let mut expected = all.clone();
    expected.sort_unstable_by(|x, y| y.cmp(x));
    assert_eq!(all, expected);
    assert_eq!(all.len(), 15);
    assert!(pages.iter().all(|p| p.items.len() <= 4));
}

#[tokio::test]
async fn test_equal_timestamps_fall_back_to_registration_order() {
    let a = Arc::new(VecProvider::new("a", vec![item_at("post", "z", 5)]));
    let b = Arc::new(VecProvider::new("b", vec![item_at("post", "a", 5)]));

    let mut forward = session(&[Arc::clone(&a), Arc::clone(&b)], config(5));
    let page = forward.load_next_page().await;
    let ids: Vec<&str> = page.items.iter().map(|i| i.identity.id.as_str()).collect();
    assert_eq!(ids, vec!["z", "a"]);

    let mut reversed = session(&[b, a], config(5));
    let page = reversed.load_next_page().await;
    let ids: Vec<&str> = page.items.iter().map(|i| i.identity.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "z"]);
}

#[tokio::test]
async fn test_transient_failure_degrades_page_then_recovers() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3])));
    let b = Arc::new(VecProvider::new("b", items("post", &[4, 2])));
    b.fail_next(1);
    let mut aggregator = session(&[a, b], config(10));

    let first = aggregator.load_next_page().await;
    assert_eq!(stamps(&first), vec![5, 3]);
    assert!(!first.done);
    assert_eq!(first.degraded.len(), 1);
    assert_eq!(first.degraded[0].name, "b");
    assert!(!first.degraded[0].permanent);

    let second = aggregator.load_next_page().await;
    assert_eq!(stamps(&second), vec![4, 2]);
    assert!(second.done);
    assert!(!second.is_degraded());
}

#[tokio::test]
async fn test_permanent_failure_excludes_provider() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3])));
    let b = Arc::new(VecProvider::new("b", items("post", &[4, 2])));
    b.fail_permanently();
    let mut aggregator = session(&[a, Arc::clone(&b)], config(10));

    let first = aggregator.load_next_page().await;
    assert_eq!(stamps(&first), vec![5, 3]);
    assert!(first.done);
    assert!(first.degraded[0].permanent);

    let second = aggregator.load_next_page().await;
    assert!(second.items.is_empty());
    assert_eq!(second.degraded.len(), 1);
    assert_eq!(b.fetch_count(), 1);
    assert_eq!(
        aggregator.provider_status(),
        vec![
            ("a".to_string(), ProviderStatus::Exhausted),
            ("b".to_string(), ProviderStatus::Failed),
        ]
    );
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let a = Arc::new(VecProvider::new("a", items("post", &[9, 8, 7, 6])).with_short_pages(1));
    let b = Arc::new(VecProvider::new("b", items("post", &[4])));
    b.fail_next(10);
    let mut aggregator = session(
        &[a, Arc::clone(&b)],
        AggregatorConfig {
            max_consecutive_failures: 2,
            ..config(10)
        },
    );

    let first = aggregator.load_next_page().await;
    assert!(!first.degraded[0].permanent);
    let second = aggregator.load_next_page().await;
    assert!(second.degraded[0].permanent);

    drain(&mut aggregator).await;
    assert_eq!(b.fetch_count(), 2);
}

#[tokio::test]
async fn test_slow_provider_times_out_as_transient_failure() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3])));
    let b = Arc::new(VecProvider::new("b", items("post", &[4])).with_delay(Duration::from_millis(500)));
    let mut aggregator = session(
        &[a, b],
        AggregatorConfig {
            fetch_timeout_ms: 20,
            ..config(10)
        },
    );

    let page = aggregator.load_next_page().await;
    assert_eq!(stamps(&page), vec![5, 3]);
    assert_eq!(page.degraded.len(), 1);
    assert!(page.degraded[0].reason.contains("timed out"));
    assert!(!page.degraded[0].permanent);
}

#[tokio::test]
async fn test_cancelled_request_leaves_session_untouched() {
    let a = Arc::new(VecProvider::new("a", items("post", &[5, 3])).with_delay(Duration::from_millis(200)));
    let b = Arc::new(VecProvider::new("b", items("post", &[4])));
    let mut aggregator = session(&[a, b], config(10));
    let before = aggregator.continuation();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = aggregator.load_next_page_with(&cancel).await;

    assert!(matches!(result, Err(AggregatorError::Cancelled)));
    assert_eq!(aggregator.continuation(), before);

    let page = aggregator.load_next_page().await;
    assert_eq!(stamps(&page), vec![5, 4, 3]);
    assert!(page.done);
}

#[tokio::test]
async fn test_resumed_session_continues_identically() {
    let build = || {
        vec![
            Arc::new(VecProvider::new("a", items("post", &[10, 8, 6, 4, 2]))),
            Arc::new(VecProvider::new("b", items("post", &[9, 7, 5, 3, 1]))),
        ]
    };

    let mut uninterrupted = session(&build(), config(3));
    let reference = drain(&mut uninterrupted).await;

    let mut original = session(&build(), config(3));
    let first = original.load_next_page().await;
    assert_eq!(stamps(&first), stamps(&reference[0]));
    let token = original.continuation().encode();
    drop(original);

    let continuation = Continuation::decode(&token).unwrap();
    let mut resumed = FederatedAggregator::resume(
        dyn_providers(&build()),
        Arc::new(NewestFirst),
        config(3),
        &continuation,
    )
    .unwrap();
    let rest = drain(&mut resumed).await;

    let expected: Vec<Vec<i64>> = reference[1..].iter().map(stamps).collect();
    let actual: Vec<Vec<i64>> = rest.iter().map(stamps).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_resume_rejects_different_provider_set() {
    let mut original = session(&[Arc::new(VecProvider::new("a", items("post", &[1])))], config(3));
    original.load_next_page().await;
    let continuation = original.continuation();

    let renamed = dyn_providers(&[Arc::new(VecProvider::new("b", items("post", &[1])))]);
    let result = FederatedAggregator::resume(renamed, Arc::new(NewestFirst), config(3), &continuation);
    assert!(matches!(result, Err(AggregatorError::ProviderSetMismatch(_))));

    let result = FederatedAggregator::resume(Vec::new(), Arc::new(NewestFirst), config(3), &continuation);
    assert!(matches!(result, Err(AggregatorError::ProviderSetMismatch(_))));
}

#[tokio::test]
async fn test_stateless_fetch_page_walks_whole_feed() {
    let build = || {
        dyn_providers(&[
            Arc::new(VecProvider::new("a", items("post", &[10, 6, 2])).with_short_pages(2)),
            Arc::new(VecProvider::new("b", items("post", &[9, 5, 1]))),
        ])
    };

    let mut token: Option<String> = None;
    let mut all = Vec::new();
    for _ in 0..20 {
        let (page, next) = fetch_page(build(), Arc::new(NewestFirst), config(2), token.as_deref())
            .await
            .unwrap();
        all.extend(stamps(&page));
        match next {
            Some(next) => token = Some(next),
            None => {
                assert!(page.done);
                break;
            }
        }
    }

    assert_eq!(all, vec![10, 9, 6, 5, 2, 1]);
}

#[tokio::test]
async fn test_stateless_fetch_page_rejects_bad_token() {
    let result = fetch_page(Vec::new(), Arc::new(NewestFirst), config(2), Some("%%%")).await;
    assert!(matches!(result, Err(AggregatorError::InvalidContinuation(_))));
}
