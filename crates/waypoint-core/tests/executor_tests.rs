mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;
use waypoint_core::config::RateLimitConfig;
use waypoint_core::store::MemoryResultStore;
use waypoint_core::{
    EngineConfig, EngineError, ErrorKind, ItemStatus, OperationExecutor, OperationItem,
    OperationRequest, Reference, ResultStore,
};

use common::{fast_config, registry, TestTool};

fn create_test_executor(tools: &[Arc<TestTool>], config: &EngineConfig) -> OperationExecutor {
    OperationExecutor::new(registry(tools), Arc::new(MemoryResultStore::new()), config)
        .expect("Failed to create executor")
}

fn fetch(url: &str) -> OperationItem {
    OperationItem::new("fetch").with_param("url", json!(url))
}

fn statuses(results: &[waypoint_core::OperationResult]) -> Vec<ItemStatus> {
    results.iter().map(|r| r.status).collect()
}

#[tokio::test]
async fn test_concurrent_identical_requests_execute_once() {
    let tool = TestTool::new("fetch")
        .delayed(Duration::from_millis(50))
        .arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());

    let mut callers = JoinSet::new();
    for _ in 0..8 {
        let executor = executor.clone();
        callers.spawn(async move {
            executor
                .execute(OperationRequest::single(fetch("a")))
                .await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = callers.join_next().await {
        results.extend(joined.unwrap().unwrap());
    }

    assert_eq!(tool.calls(), 1);
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(results.iter().filter(|r| r.coalesced).count(), 7);
    let first = results[0].payload_ref.clone();
    assert!(results.iter().all(|r| r.payload_ref == first));
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let tool = TestTool::new("fetch").arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());

    let first = executor
        .execute(OperationRequest::single(fetch("a")))
        .await
        .unwrap();
    let second = executor
        .execute(OperationRequest::single(fetch("a")))
        .await
        .unwrap();

    assert_eq!(first[0].status, ItemStatus::Done);
    assert_eq!(second[0].status, ItemStatus::CacheHit);
    assert_eq!(second[0].attempts, 0);
    assert_eq!(second[0].payload_ref, first[0].payload_ref);
    assert_eq!(tool.calls(), 1);
    assert_eq!(executor.cache().len(), 1);
}

#[tokio::test]
async fn test_non_idempotent_tool_is_never_cached() {
    let tool = TestTool::new("write").non_idempotent().arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());
    let request = || OperationRequest::single(OperationItem::new("write").with_param("path", json!("x")));

    executor.execute(request()).await.unwrap();
    let second = executor.execute(request()).await.unwrap();

    assert_eq!(second[0].status, ItemStatus::Done);
    assert_eq!(tool.calls(), 2);
    assert!(executor.cache().is_empty());
}

#[tokio::test]
async fn test_cache_ttl_zero_disables_category() {
    let tool = TestTool::new("fetch").arc();
    let mut config = fast_config();
    config.cache.default_ttl_secs = 0;
    let executor = create_test_executor(&[tool.clone()], &config);

    executor.execute(OperationRequest::single(fetch("a"))).await.unwrap();
    let second = executor.execute(OperationRequest::single(fetch("a"))).await.unwrap();

    assert_eq!(second[0].status, ItemStatus::Done);
    assert_eq!(tool.calls(), 2);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let tool = TestTool::new("fetch").flaky(2).arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());

    let results = executor
        .execute(OperationRequest::single(fetch("a")))
        .await
        .unwrap();

    assert_eq!(results[0].status, ItemStatus::Done);
    assert_eq!(results[0].attempts, 3);
}

#[tokio::test]
async fn test_retries_stop_at_the_limit() {
    let tool = TestTool::new("fetch").flaky(100).arc();
    let mut config = fast_config();
    config.retry.max_retries = 2;
    let executor = create_test_executor(&[tool.clone()], &config);

    let results = executor
        .execute(OperationRequest::single(fetch("a")))
        .await
        .unwrap();

    assert_eq!(results[0].status, ItemStatus::Failed);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(results[0].error.as_ref().unwrap().kind, ErrorKind::Transient);
    assert_eq!(tool.calls(), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let tool = TestTool::new("fetch").failing().arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());

    let results = executor
        .execute(OperationRequest::single(fetch("a")))
        .await
        .unwrap();

    assert_eq!(results[0].error.as_ref().unwrap().kind, ErrorKind::Permanent);
    assert_eq!(tool.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out_and_retries_only_idempotent() {
    let slow = TestTool::new("fetch").delayed(Duration::from_secs(5)).arc();
    let write = TestTool::new("write")
        .delayed(Duration::from_secs(5))
        .non_idempotent()
        .arc();
    let executor = create_test_executor(&[slow.clone(), write.clone()], &fast_config());

    let results = executor
        .execute(OperationRequest::single(fetch("a")).with_deadline_ms(100))
        .await
        .unwrap();
    assert_eq!(results[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(results[0].attempts, 4);

    let results = executor
        .execute(OperationRequest::single(OperationItem::new("write")).with_deadline_ms(100))
        .await
        .unwrap();
    assert_eq!(results[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(results[0].attempts, 1);
    assert_eq!(write.calls(), 1);
}

#[tokio::test]
async fn test_sequence_aborts_after_first_failure() {
    let fetch_tool = TestTool::new("fetch").arc();
    let broken = TestTool::new("broken").failing().arc();
    let executor = create_test_executor(&[fetch_tool.clone(), broken], &fast_config());

    let items = vec![fetch("a"), OperationItem::new("broken").with_id("b"), fetch("c")];
    let results = executor
        .execute(OperationRequest::sequence(items.clone()))
        .await
        .unwrap();
    assert_eq!(
        statuses(&results),
        vec![ItemStatus::Done, ItemStatus::Failed, ItemStatus::Skipped]
    );
    assert_eq!(results[2].error.as_ref().unwrap().kind, ErrorKind::Skipped);
    assert_eq!(fetch_tool.calls(), 1);

    let results = executor
        .execute(OperationRequest::sequence(items).continue_on_error())
        .await
        .unwrap();
    assert_eq!(
        statuses(&results),
        vec![ItemStatus::CacheHit, ItemStatus::Failed, ItemStatus::Done]
    );
}

#[tokio::test]
async fn test_sequence_passes_outputs_forward() {
    let fetch_tool = TestTool::new("fetch").arc();
    let summarize = TestTool::new("summarize").arc();
    let executor = create_test_executor(&[fetch_tool, summarize], &fast_config());

    let items = vec![
        fetch("page").with_id("first"),
        OperationItem::new("summarize")
            .with_id("second")
            .with_param("text", Reference::new("first", Some("url"))),
    ];
    let results = executor
        .execute(OperationRequest::sequence(items))
        .await
        .unwrap();

    let payload_ref = results[1].payload_ref.as_ref().unwrap();
    let payload = executor.results().get(payload_ref).await.unwrap();
    assert_eq!(payload, json!({"text": "page"}));
}

#[tokio::test]
async fn test_batch_reports_partial_failure_in_order() {
    let fetch_tool = TestTool::new("fetch")
        .delayed(Duration::from_millis(5))
        .arc();
    let broken = TestTool::new("broken").failing().arc();
    let executor = create_test_executor(&[fetch_tool, broken], &fast_config());

    let results = executor
        .execute(OperationRequest::batch(vec![
            fetch("1").with_id("one"),
            OperationItem::new("broken").with_id("two"),
            fetch("3").with_id("three"),
            OperationItem::new("missing").with_id("four"),
        ]))
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().filter_map(|r| r.item_id.as_deref()).collect();
    assert_eq!(ids, vec!["one", "two", "three", "four"]);
    assert_eq!(
        statuses(&results),
        vec![
            ItemStatus::Done,
            ItemStatus::Failed,
            ItemStatus::Done,
            ItemStatus::Failed
        ]
    );
    assert_eq!(
        results[3].error.as_ref().unwrap().kind,
        ErrorKind::UnknownAction
    );
}

#[tokio::test]
async fn test_parallel_respects_its_ceiling() {
    let tool = TestTool::new("fetch").arc();
    let executor = create_test_executor(&[tool.clone()], &fast_config());

    let items: Vec<OperationItem> = (0..6).map(|i| fetch(&i.to_string())).collect();
    let results = executor
        .execute(OperationRequest::parallel(items.clone(), 2))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(tool.calls(), 6);

    let error = executor
        .execute(OperationRequest::parallel(items, 0))
        .await
        .unwrap_err();
    assert!(matches!(error, EngineError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_single_mode_takes_exactly_one_item() {
    let executor = create_test_executor(&[TestTool::new("fetch").arc()], &fast_config());
    let mut request = OperationRequest::single(fetch("a"));
    request.items.push(fetch("b"));

    let error = executor.execute(request).await.unwrap_err();
    assert!(matches!(error, EngineError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_rate_limited_item_is_reported() {
    let tool = TestTool::new("fetch").arc();
    let mut config = fast_config();
    config.rate_limits.insert(
        "fetch".to_string(),
        RateLimitConfig {
            per_second: 0.001,
            burst: 1,
            max_wait_ms: 0,
        },
    );
    let executor = create_test_executor(&[tool.clone()], &config);

    let results = executor
        .execute(OperationRequest::batch(vec![fetch("a"), fetch("b")]))
        .await
        .unwrap();

    let mut found = statuses(&results);
    found.sort_by_key(|s| s.as_str());
    assert_eq!(found, vec![ItemStatus::Done, ItemStatus::RateLimited]);
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_config_must_match_registry() {
    let mut config = fast_config();
    config.rate_limits.insert(
        "fetch".to_string(),
        RateLimitConfig {
            per_second: 1.0,
            burst: 1,
            max_wait_ms: 0,
        },
    );
    let result = OperationExecutor::new(
        registry(&[TestTool::new("other").arc()]),
        Arc::new(MemoryResultStore::new()),
        &config,
    );
    assert!(matches!(result, Err(EngineError::Configuration { .. })));
}
