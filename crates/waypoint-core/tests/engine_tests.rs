mod common;

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use waypoint_core::config::RateLimitConfig;
use waypoint_core::models::DirectReason;
use waypoint_core::{
    EngineBuilder, EngineConfig, ErrorKind, FilePlanner, Orchestrator, Plan, ResultStore, StepId,
    StepStatus, TurnResponse,
};

use common::{create_test_engine, create_test_engine_with, fast_config, TestTool};

const SESSION: &str = "session-1";

async fn turn(engine: &Orchestrator, input: &str) -> TurnResponse {
    engine
        .run_turn(SESSION, input)
        .await
        .expect("Failed to run turn")
}

async fn current(engine: &Orchestrator) -> Plan {
    engine
        .plans()
        .current(SESSION)
        .await
        .expect("Failed to load plan")
}

fn finished_step(response: &TurnResponse) -> &str {
    match response {
        TurnResponse::StepFinished { step_id, .. } => step_id.as_str(),
        other => panic!("expected a finished step, got {other:?}"),
    }
}

/// Waits until the background execution of `step` has written its result.
async fn wait_until_terminal(engine: &Orchestrator, step: &str) -> Plan {
    for _ in 0..200 {
        let plan = current(engine).await;
        if plan
            .step(&StepId::from(step))
            .is_some_and(|s| s.status.is_terminal())
        {
            return plan;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("step '{step}' never finished");
}

#[tokio::test]
async fn test_plan_runs_one_step_per_turn_until_complete() {
    let fetch = TestTool::new("fetch").arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine(
        "fetch url=a\nsummarize text=@s1.url",
        &[fetch.clone(), summarize.clone()],
    )
    .await;

    let created = turn(&engine, "fetch a then summarize it").await;
    let TurnResponse::PlanCreated { plan, warnings } = created else {
        panic!("expected a new plan, got {created:?}");
    };
    assert!(warnings.is_empty());
    assert_eq!(plan.steps.len(), 2);
    let dependencies: Vec<&StepId> = plan.steps[1].dependencies.iter().collect();
    assert_eq!(dependencies, vec![&StepId::from("s1")]);
    assert_eq!(fetch.calls(), 0, "creating a plan runs nothing");

    assert_eq!(finished_step(&turn(&engine, "go on").await), "s1");
    let second = turn(&engine, "go on").await;
    let TurnResponse::StepFinished { step_id, result } = second else {
        panic!("expected s2 to finish, got {second:?}");
    };
    assert_eq!(step_id, StepId::from("s2"));
    let payload_ref = result.payload_ref.expect("payload stored");
    let payload = engine.executor().results().get(&payload_ref).await.unwrap();
    assert_eq!(payload, json!({"text": "a"}));

    let done = turn(&engine, "go on").await;
    let TurnResponse::PlanComplete { results } = done else {
        panic!("expected completion, got {done:?}");
    };
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].payload, Some(json!({"url": "a"})));
    assert!(!current(&engine).await.is_usable(), "completed plan is discarded");

    let history = engine.plans().history(SESSION).await.unwrap();
    let kinds: Vec<&str> = history.iter().map(|t| t.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["plan_created", "step_finished", "step_finished", "plan_complete"]
    );
}

#[tokio::test]
async fn test_fan_out_runs_lowest_index_first() {
    let fetch = TestTool::new("fetch").arc();
    let engine = create_test_engine(
        "s1: fetch url=a\ns2: fetch url=b after s1\ns3: fetch url=c after s1",
        &[fetch.clone()],
    )
    .await;

    turn(&engine, "fetch a then b and c").await;
    assert_eq!(finished_step(&turn(&engine, "next").await), "s1");
    assert_eq!(current(&engine).await.frontier(), vec![1, 2]);

    assert_eq!(finished_step(&turn(&engine, "next").await), "s2");
    assert_eq!(finished_step(&turn(&engine, "next").await), "s3");
    assert_eq!(fetch.calls(), 3);
}

#[tokio::test]
async fn test_failed_step_blocks_its_dependents() {
    let fetch = TestTool::new("fetch").arc();
    let broken = TestTool::new("broken").failing().arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine(
        "fetch url=a\nbroken\nsummarize text=@s2",
        &[fetch, broken, summarize.clone()],
    )
    .await;

    turn(&engine, "fetch then break then summarize").await;
    turn(&engine, "next").await;

    let failed = turn(&engine, "next").await;
    let TurnResponse::StepFailed { step_id, error } = failed else {
        panic!("expected a failure, got {failed:?}");
    };
    assert_eq!(step_id, StepId::from("s2"));
    assert_eq!(error.kind, ErrorKind::Permanent);

    let blocked = turn(&engine, "next").await;
    assert_eq!(
        blocked,
        TurnResponse::PlanBlocked {
            failed: vec![StepId::from("s2")],
            stalled: vec![StepId::from("s3")],
        }
    );
    assert_eq!(summarize.calls(), 0);
    assert_eq!(
        current(&engine).await.steps[2].status,
        StepStatus::Pending,
        "a blocked step is never dispatched"
    );
}

#[tokio::test]
async fn test_direct_answers() {
    let fetch = TestTool::new("fetch").arc();

    let engine = create_test_engine("fetch url=a", &[fetch.clone()]).await;
    assert_eq!(
        turn(&engine, "hello").await,
        TurnResponse::DirectAnswer {
            reason: DirectReason::NotComplex
        }
    );

    let engine = create_test_engine("# nothing to do", &[fetch.clone()]).await;
    assert_eq!(
        turn(&engine, "plan a then b").await,
        TurnResponse::DirectAnswer {
            reason: DirectReason::EmptyPlan
        }
    );

    let engine = create_test_engine("fetch url=a\nlaunch target=moon", &[fetch]).await;
    let response = turn(&engine, "fetch then launch").await;
    let TurnResponse::DirectAnswer {
        reason: DirectReason::PlanGenerationFailed(error),
    } = response
    else {
        panic!("expected a rejected plan, got {response:?}");
    };
    assert_eq!(error.kind, ErrorKind::PlanParse);
    assert!(error.message.contains("launch"));
    assert!(!current(&engine).await.is_usable(), "nothing partial is stored");
}

#[tokio::test]
async fn test_planner_failure_is_answered_directly() {
    let engine = EngineBuilder::new()
        .in_memory()
        .with_registry(common::registry(&[TestTool::new("fetch").arc()]))
        .with_planner(FilePlanner::new("/nonexistent/plan.txt"))
        .with_complexity_policy(|_input: &str| true)
        .with_regeneration_policy(|_input: &str, _plan: &Plan| false)
        .build()
        .await
        .unwrap();

    let response = turn(&engine, "anything").await;
    let TurnResponse::DirectAnswer {
        reason: DirectReason::PlanGenerationFailed(error),
    } = response
    else {
        panic!("expected a planning failure, got {response:?}");
    };
    assert_eq!(error.kind, ErrorKind::PlanGeneration);
}

#[tokio::test]
async fn test_regeneration_waits_for_processing_step() {
    let gate = Arc::new(Notify::new());
    let slow = TestTool::new("slow").gated(Arc::clone(&gate)).arc();
    let fetch = TestTool::new("fetch").arc();
    let engine = create_test_engine("slow\nfetch url=a", &[slow, fetch]).await;

    turn(&engine, "wait then fetch").await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let response = engine
        .run_turn_cancellable(SESSION, "go", cancel)
        .await
        .unwrap();
    assert_eq!(
        response,
        TurnResponse::Cancelled {
            step_id: StepId::from("s1")
        }
    );
    let before = current(&engine).await;
    assert_eq!(before.steps[0].status, StepStatus::Processing);

    let deferred = turn(&engine, "instead do something then else").await;
    assert_eq!(
        deferred,
        TurnResponse::AwaitingStep {
            step_id: StepId::from("s1")
        }
    );
    assert_eq!(current(&engine).await.version, before.version);

    gate.notify_one();
    let plan = wait_until_terminal(&engine, "s1").await;
    assert_eq!(plan.steps[0].status, StepStatus::Done);
    assert!(plan.steps[0].abandoned);

    let regenerated = turn(&engine, "instead do something then else").await;
    let TurnResponse::PlanCreated { plan, .. } = regenerated else {
        panic!("expected a new plan, got {regenerated:?}");
    };
    assert!(plan.version > before.version);
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
}

fn limited_config(max_wait_ms: u64) -> EngineConfig {
    let mut config = fast_config();
    config.retry.rate_limit_max_wait_ms = max_wait_ms;
    config.rate_limits.insert(
        "fetch".to_string(),
        RateLimitConfig {
            per_second: 0.001,
            burst: 1,
            max_wait_ms: 0,
        },
    );
    config
}

#[tokio::test]
async fn test_rate_limited_step_stays_pending() {
    let fetch = TestTool::new("fetch").arc();
    let engine =
        create_test_engine_with("fetch url=a\nfetch url=b", &[fetch.clone()], limited_config(60_000))
            .await;

    turn(&engine, "fetch a then b").await;
    assert_eq!(finished_step(&turn(&engine, "next").await), "s1");

    let limited = turn(&engine, "next").await;
    let TurnResponse::RateLimited {
        step_id,
        retry_after_ms,
    } = limited
    else {
        panic!("expected a rate limit, got {limited:?}");
    };
    assert_eq!(step_id, StepId::from("s2"));
    assert!(retry_after_ms > 0);

    let plan = current(&engine).await;
    assert_eq!(plan.steps[1].status, StepStatus::Pending);
    assert!(plan.steps[1].rate_limited_since.is_some());
    assert_eq!(fetch.calls(), 1);
}

#[tokio::test]
async fn test_rate_limit_past_max_wait_fails_step() {
    let fetch = TestTool::new("fetch").arc();
    let engine =
        create_test_engine_with("fetch url=a\nfetch url=b", &[fetch], limited_config(0)).await;

    turn(&engine, "fetch a then b").await;
    turn(&engine, "next").await;

    let failed = turn(&engine, "next").await;
    let TurnResponse::StepFailed { step_id, error } = failed else {
        panic!("expected a failure, got {failed:?}");
    };
    assert_eq!(step_id, StepId::from("s2"));
    assert_eq!(error.kind, ErrorKind::RateLimited);
    assert_eq!(current(&engine).await.steps[1].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_chain_runs_linear_steps_as_one_sequence() {
    let fetch = TestTool::new("fetch").arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine(
        "fetch url=a\nsummarize text=@s1.url\nfetch url=z",
        &[fetch.clone(), summarize],
    )
    .await;

    turn(&engine, "fetch then summarize then fetch").await;
    let response = engine.run_chain(SESSION, "run it").await.unwrap();
    let TurnResponse::ChainFinished { steps, results } = response else {
        panic!("expected a chain, got {response:?}");
    };
    assert_eq!(steps, vec![StepId::from("s1"), StepId::from("s2"), StepId::from("s3")]);
    assert!(results.iter().all(|r| r.is_success()));
    assert!(current(&engine)
        .await
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Done));

    assert!(matches!(
        turn(&engine, "next").await,
        TurnResponse::PlanComplete { .. }
    ));
}

#[tokio::test]
async fn test_chain_failure_skips_the_rest() {
    let fetch = TestTool::new("fetch").arc();
    let broken = TestTool::new("broken").failing().arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine(
        "fetch url=a\nbroken\nsummarize text=@s2",
        &[fetch, broken, summarize.clone()],
    )
    .await;

    turn(&engine, "fetch then break then summarize").await;
    engine.run_chain(SESSION, "run it").await.unwrap();

    let statuses: Vec<StepStatus> = current(&engine).await.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Done, StepStatus::Failed, StepStatus::Skipped]
    );
    assert_eq!(summarize.calls(), 0);

    assert_eq!(
        turn(&engine, "next").await,
        TurnResponse::PlanBlocked {
            failed: vec![StepId::from("s2")],
            stalled: vec![],
        }
    );
}

#[tokio::test]
async fn test_chain_stops_before_rate_limited_step() {
    let fetch = TestTool::new("fetch").arc();
    let engine =
        create_test_engine_with("fetch url=a\nfetch url=b", &[fetch.clone()], limited_config(60_000))
            .await;

    turn(&engine, "fetch a then b").await;
    let response = engine.run_chain(SESSION, "run it").await.unwrap();
    assert_eq!(finished_step(&response), "s1");

    let plan = current(&engine).await;
    assert_eq!(plan.steps[0].status, StepStatus::Done);
    assert_eq!(plan.steps[1].status, StepStatus::Pending);
    assert!(plan.steps[1].error.is_none());
    assert_eq!(fetch.calls(), 1);

    let limited = engine.run_chain(SESSION, "run it").await.unwrap();
    assert!(matches!(limited, TurnResponse::RateLimited { .. }));
    let plan = current(&engine).await;
    assert_eq!(plan.steps[1].status, StepStatus::Pending);
    assert!(plan.steps[1].rate_limited_since.is_some());
}

#[tokio::test]
async fn test_chain_of_one_runs_single_step() {
    let fetch = TestTool::new("fetch").arc();
    let engine = create_test_engine(
        "s1: fetch url=a\ns2: fetch url=b after s1\ns3: fetch url=c after s1",
        &[fetch],
    )
    .await;

    turn(&engine, "fetch then fan out").await;
    let response = engine.run_chain(SESSION, "run").await.unwrap();
    assert_eq!(finished_step(&response), "s1");
}

#[tokio::test]
async fn test_empty_session_id_is_rejected() {
    let engine = create_test_engine("fetch url=a", &[TestTool::new("fetch").arc()]).await;
    assert!(engine.run_turn(" ", "fetch then stop").await.is_err());
}

#[tokio::test]
async fn test_unresolvable_reference_fails_before_dispatch() {
    let fetch = TestTool::new("fetch").arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine(
        "fetch url=a\nsummarize text=@s1.missing",
        &[fetch, summarize.clone()],
    )
    .await;

    turn(&engine, "fetch then summarize").await;
    assert_eq!(finished_step(&turn(&engine, "next").await), "s1");

    let failed = turn(&engine, "next").await;
    let TurnResponse::StepFailed { step_id, error } = failed else {
        panic!("expected a failure, got {failed:?}");
    };
    assert_eq!(step_id, StepId::from("s2"));
    assert_eq!(error.kind, ErrorKind::DependencyUnresolved);
    assert_eq!(summarize.calls(), 0);
    assert_eq!(current(&engine).await.steps[1].status, StepStatus::Failed);
}

async fn mark_processing(engine: &Orchestrator, since: Timestamp) {
    let mut plan = current(engine).await;
    plan.steps[0].status = StepStatus::Processing;
    plan.steps[0].processing_since = Some(since);
    engine
        .plans()
        .commit(&mut plan)
        .await
        .expect("Failed to save plan");
}

#[tokio::test]
async fn test_stale_processing_step_is_failed_as_abandoned() {
    let fetch = TestTool::new("fetch").arc();
    let summarize = TestTool::new("summarize").arc();
    let engine = create_test_engine("fetch url=a\nsummarize text=@s1", &[fetch, summarize]).await;

    turn(&engine, "fetch then summarize").await;
    let an_hour_ago = Timestamp::now()
        .checked_sub(SignedDuration::from_hours(1))
        .unwrap();
    mark_processing(&engine, an_hour_ago).await;

    assert_eq!(
        turn(&engine, "next").await,
        TurnResponse::PlanBlocked {
            failed: vec![StepId::from("s1")],
            stalled: vec![StepId::from("s2")],
        }
    );
    let step = &current(&engine).await.steps[0];
    assert_eq!(step.status, StepStatus::Failed);
    assert!(step.abandoned);
    assert_eq!(step.error.as_ref().unwrap().kind, ErrorKind::Abandoned);
}

#[tokio::test]
async fn test_recent_processing_step_is_awaited() {
    let fetch = TestTool::new("fetch").arc();
    let engine = create_test_engine("fetch url=a", &[fetch]).await;

    turn(&engine, "fetch then stop").await;
    mark_processing(&engine, Timestamp::now()).await;

    assert_eq!(
        turn(&engine, "next").await,
        TurnResponse::AwaitingStep {
            step_id: StepId::from("s1")
        }
    );
    assert_eq!(current(&engine).await.steps[0].status, StepStatus::Processing);
}
