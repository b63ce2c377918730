mod common;

use serde_json::json;
use tempfile::TempDir;
use waypoint_core::models::{Reference, ResultRef};
use waypoint_core::store::{SqliteResultStore, SqliteSessionStore};
use waypoint_core::{
    EngineBuilder, EngineError, FixedPlanner, Plan, PlanStep, ResultStore, SessionStore, StepId,
    StepStatus, Turn, TurnResponse,
};

use common::{create_sqlite_engine, registry, TestTool};

async fn create_test_stores() -> (TempDir, SqliteSessionStore, SqliteResultStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("nested").join("test.db");
    let sessions = SqliteSessionStore::open(&db_path)
        .await
        .expect("Failed to open session store");
    let results = SqliteResultStore::open(&db_path)
        .await
        .expect("Failed to open result store");
    (temp_dir, sessions, results)
}

fn sample_plan(session_id: &str) -> Plan {
    let mut plan = Plan::empty(session_id);
    plan.goal = Some("fetch then summarize".to_string());
    plan.steps = vec![
        PlanStep::new("s1", "fetch").with_param("url", json!("https://example.com")),
        PlanStep::new("s2", "summarize")
            .with_param("text", Reference::new("s1", Some("body")))
            .depends_on("s1"),
    ];
    plan
}

#[tokio::test]
async fn test_missing_plan_loads_as_none() {
    let (_temp_dir, sessions, _results) = create_test_stores().await;
    assert!(sessions.load_plan("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_plan_round_trips() {
    let (_temp_dir, sessions, _results) = create_test_stores().await;

    let mut plan = sample_plan("a");
    plan.steps[0].status = StepStatus::Processing;
    plan.steps[0].processing_since = Some("2026-01-02T03:04:05Z".parse().unwrap());
    sessions.save_plan(&mut plan).await.unwrap();
    assert_eq!(plan.version, 1);

    let loaded = sessions.load_plan("a").await.unwrap().unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.goal, plan.goal);
    assert_eq!(loaded.steps, plan.steps);
}

#[tokio::test]
async fn test_stale_save_is_a_version_conflict() {
    let (_temp_dir, sessions, _results) = create_test_stores().await;

    let mut plan = sample_plan("a");
    sessions.save_plan(&mut plan).await.unwrap();

    let mut first = sessions.load_plan("a").await.unwrap().unwrap();
    let mut second = sessions.load_plan("a").await.unwrap().unwrap();

    first.steps[0].status = StepStatus::Processing;
    sessions.save_plan(&mut first).await.unwrap();
    assert_eq!(first.version, 2);

    second.steps[0].status = StepStatus::Failed;
    let error = sessions.save_plan(&mut second).await.unwrap_err();
    assert!(matches!(
        error,
        EngineError::VersionConflict {
            expected: 1,
            found: 2,
            ..
        }
    ));

    let stored = sessions.load_plan("a").await.unwrap().unwrap();
    assert_eq!(stored.steps[0].status, StepStatus::Processing);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (_temp_dir, sessions, _results) = create_test_stores().await;

    let mut a = sample_plan("a");
    let mut b = sample_plan("b");
    b.steps.truncate(1);
    sessions.save_plan(&mut a).await.unwrap();
    sessions.save_plan(&mut b).await.unwrap();

    assert_eq!(sessions.load_plan("a").await.unwrap().unwrap().steps.len(), 2);
    assert_eq!(sessions.load_plan("b").await.unwrap().unwrap().steps.len(), 1);
}

#[tokio::test]
async fn test_history_is_ordered_per_session() {
    let (_temp_dir, sessions, _results) = create_test_stores().await;

    let awaiting = TurnResponse::AwaitingStep {
        step_id: StepId::from("s1"),
    };
    sessions
        .append_history(&Turn::new("a", "first", &awaiting))
        .await
        .unwrap();
    sessions
        .append_history(&Turn::new("b", "elsewhere", &awaiting))
        .await
        .unwrap();
    sessions
        .append_history(&Turn::new("a", "second", &awaiting))
        .await
        .unwrap();

    let turns = sessions.history("a").await.unwrap();
    let inputs: Vec<&str> = turns.iter().map(|t| t.input.as_str()).collect();
    assert_eq!(inputs, vec!["first", "second"]);
    assert_eq!(turns[0].kind, "awaiting_step");
}

#[tokio::test]
async fn test_result_store_put_and_get() {
    let (_temp_dir, _sessions, results) = create_test_stores().await;

    let payload = json!({"rows": [1, 2, 3], "title": "report"});
    let reference = results.put(payload.clone()).await.unwrap();
    assert_eq!(results.get(&reference).await.unwrap(), payload);

    let missing = results.get(&ResultRef::new("nope")).await.unwrap_err();
    assert!(matches!(missing, EngineError::ResultNotFound { .. }));
}

#[tokio::test]
async fn test_engine_resumes_plan_from_disk() {
    let fetch = TestTool::new("fetch").arc();
    let (temp_dir, engine) = create_sqlite_engine("fetch url=a\nfetch url=b", &[fetch.clone()]).await;

    let created = engine.run_turn("s", "fetch a then b").await.unwrap();
    assert!(matches!(created, TurnResponse::PlanCreated { .. }));
    drop(engine);

    let db_path = temp_dir.path().join("test.db");
    assert!(db_path.exists());

    let reopened = EngineBuilder::new()
        .with_database_path(Some(&db_path))
        .with_registry(registry(&[fetch.clone()]))
        .with_planner(FixedPlanner::new(""))
        .with_complexity_policy(|_input: &str| false)
        .with_regeneration_policy(|_input: &str, _plan: &Plan| false)
        .build()
        .await
        .unwrap();

    let response = reopened.run_turn("s", "next").await.unwrap();
    assert!(matches!(
        response,
        TurnResponse::StepFinished { ref step_id, .. } if step_id.as_str() == "s1"
    ));
    assert_eq!(fetch.calls(), 1);

    let history = reopened.plans().history("s").await.unwrap();
    assert_eq!(history.len(), 2);
}
