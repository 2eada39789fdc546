//! Exercises the public submit -> assign -> complete surface described in
//! spec §4.1, using the in-memory backends so the scenarios run without any
//! external services.

use std::sync::Arc;
use std::time::Duration;

use agentmesh_core::assignment::{submit_task, AssignmentEngine, AssignmentFailure, CapabilityMatch, DispatcherConfig};
use agentmesh_core::clock::SteerableClock;
use agentmesh_core::cost::{CostGate, CostGateConfig};
use agentmesh_core::queue::{MemoryQueueBroker, QueueBroker, SharedQueueBroker};
use agentmesh_core::registry::{AgentRegistry, Capability, RegisterParams};
use agentmesh_core::tasks::{InMemoryTaskStore, NewTask, RequiredCapability, SharedTaskStore, TaskStatus, TaskStore};

fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        poll_batch: 8,
        poll_wait: Duration::from_millis(10),
        assignment_lease: Duration::from_secs(60),
        no_agent_retry_after: Duration::from_millis(100),
        idempotency_ttl: chrono::Duration::seconds(3600),
    }
}

fn permissive_cost_gate() -> CostGate {
    CostGate::new(CostGateConfig {
        warn_ratio: 0.8,
        crit_ratio: 0.95,
        default_session_limit_usd: 1000.0,
        default_tenant_daily_limit_usd: 1000.0,
    })
}

fn new_params(tenant: &str, task_type: &str, required: Vec<RequiredCapability>) -> NewTask {
    NewTask {
        tenant_id: tenant.into(),
        requester_id: "requester-1".into(),
        session_id: None,
        task_type: task_type.into(),
        priority: 1,
        payload: serde_json::json!({ "op": task_type }),
        deadline: None,
        required_capabilities: required,
        cost_budget_usd: 5.0,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn round_trip_register_assign_complete() {
    let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::default());
    let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(Arc::new(SteerableClock::new()), 3));
    let cost_gate = permissive_cost_gate();
    let config = dispatcher_config();

    let registry = AgentRegistry::new(Arc::new(SteerableClock::new()));
    registry.register(RegisterParams {
        tenant_id: "tenant-a".into(),
        agent_id: "agent-1".into(),
        agent_type: "worker".into(),
        capabilities: vec![Capability {
            name: "code_review".into(),
            confidence: 0.9,
            specialties: vec![],
            languages: vec![],
            model_id: None,
        }],
        max_concurrent: 2,
    });

    let mut engine = AssignmentEngine::new(registry.clone(), "capability_match");
    engine.register_strategy("capability_match", Arc::new(CapabilityMatch::new(0.1)));

    let task = submit_task(
        &task_store,
        &cost_gate,
        &queue,
        &config,
        new_params("tenant-a", "code_review", vec![]),
    )
    .await
    .unwrap();
    assert!(matches!(task.status, TaskStatus::Pending));

    let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].task_id, task.task_id);

    let (_, agent_id) = engine.assign(&task).unwrap();
    assert_eq!(agent_id, "agent-1");

    let assigned = task_store
        .record_assignment("tenant-a", task.task_id, agent_id, chrono::Utc::now() + chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert!(matches!(assigned.status, TaskStatus::Assigned));
    queue.delete(&messages[0].receipt).await.unwrap();

    task_store.transition("tenant-a", task.task_id, TaskStatus::InProgress, "agent started").await.unwrap();
    let completed = task_store
        .record_result("tenant-a", task.task_id, serde_json::json!({ "ok": true }), 0.02)
        .await
        .unwrap();
    assert!(matches!(completed.status, TaskStatus::Completed));
    assert_eq!(completed.observed_cost_usd, 0.02);
}

#[tokio::test]
async fn over_budget_submission_is_rejected_before_persisting() {
    let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::default());
    let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(Arc::new(SteerableClock::new()), 3));
    let cost_gate = CostGate::new(CostGateConfig {
        warn_ratio: 0.8,
        crit_ratio: 0.95,
        default_session_limit_usd: 1.0,
        default_tenant_daily_limit_usd: 1.0,
    });
    let config = dispatcher_config();

    let mut params = new_params("tenant-a", "code_review", vec![]);
    params.cost_budget_usd = 200.0;

    let result = submit_task(&task_store, &cost_gate, &queue, &config, params).await;
    assert!(result.is_err());

    let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn capability_mismatch_finds_no_candidate() {
    let registry = AgentRegistry::new(Arc::new(SteerableClock::new()));
    registry.register(RegisterParams {
        tenant_id: "tenant-a".into(),
        agent_id: "agent-1".into(),
        agent_type: "worker".into(),
        capabilities: vec![Capability {
            name: "code_review".into(),
            confidence: 0.9,
            specialties: vec![],
            languages: vec![],
            model_id: None,
        }],
        max_concurrent: 2,
    });

    let mut engine = AssignmentEngine::new(registry.clone(), "capability_match");
    engine.register_strategy("capability_match", Arc::new(CapabilityMatch::new(0.1)));

    let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::default());
    let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(Arc::new(SteerableClock::new()), 3));
    let cost_gate = permissive_cost_gate();
    let config = dispatcher_config();

    let required = vec![RequiredCapability { name: "security_audit".into(), languages: vec![], confidence_floor: 0.8 }];
    let task = submit_task(&task_store, &cost_gate, &queue, &config, new_params("tenant-a", "security_audit", required))
        .await
        .unwrap();

    assert_eq!(engine.assign(&task), Err(AssignmentFailure::NoCapableAgent));
}

#[tokio::test]
async fn idempotent_submission_returns_existing_task_without_requeueing() {
    let task_store: SharedTaskStore = Arc::new(InMemoryTaskStore::default());
    let queue: SharedQueueBroker = Arc::new(MemoryQueueBroker::new(Arc::new(SteerableClock::new()), 3));
    let cost_gate = permissive_cost_gate();
    let config = dispatcher_config();

    let mut first_params = new_params("tenant-a", "code_review", vec![]);
    first_params.idempotency_key = Some("req-42".into());
    let mut second_params = new_params("tenant-a", "code_review", vec![]);
    second_params.idempotency_key = Some("req-42".into());

    let first = submit_task(&task_store, &cost_gate, &queue, &config, first_params).await.unwrap();
    let second = submit_task(&task_store, &cost_gate, &queue, &config, second_params).await.unwrap();

    assert_eq!(first.task_id, second.task_id);

    let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
    assert_eq!(messages.len(), 1, "idempotent resubmission must not enqueue a second assignment attempt");
}

#[tokio::test]
async fn queue_delivers_higher_priority_task_first() {
    let clock = Arc::new(SteerableClock::new());
    let queue = MemoryQueueBroker::new(clock, 3);

    let low = uuid::Uuid::new_v4();
    let high = uuid::Uuid::new_v4();
    queue.enqueue(low, 1, Duration::from_secs(60)).await.unwrap();
    queue.enqueue(high, 5, Duration::from_secs(60)).await.unwrap();

    let messages = queue.receive(8, Duration::from_millis(1)).await.unwrap();
    assert_eq!(messages[0].task_id, high);
    assert_eq!(messages[1].task_id, low);
}
