//! Save strategies end to end against a mock proxy.

use assert_matches::assert_matches;
use canopy_core::{BusyConfig, CanopyError, SaveStrategyKind};
use canopy_flow::events::{REQUEST_SAVE, SAVE_ERROR, SAVE_SUCCESS};
use canopy_flow::{PreparedSave, SaveEvent, SaveHandler, SaveOutcome};
use canopy_testkit::*;
use canopy_tree::{LifecycleOrchestrator, MountTarget, NodeRef};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

async fn load(children: Value) -> NodeRef {
    init_tracing();
    let log = PhaseLog::new();
    let orchestrator = LifecycleOrchestrator::builder(
        Arc::new(test_registry(&log)),
        manager_with(Arc::new(EchoTransport::new())),
    )
    .build();
    let root = group_root(&log, children);
    let target: Arc<dyn MountTarget> = Arc::new(RecordingMountTarget::new());
    orchestrator.load(&root, Value::Null, &[target]).await.unwrap();
    root
}

fn form() -> Value {
    json!({
        "A": {"component": "field"},
        "B": {"component": "field"},
        "C": {"component": "field"}
    })
}

fn edit(root: &NodeRef, key: &str, value: &str) {
    let child = root.child(key).unwrap();
    child.set_data(Some(json!(value)));
    child.fire(FIELD_EDITED, Value::Null);
}

fn record_events(handler: &SaveHandler) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handler.add_listener(move |event| {
        let name = match event {
            SaveEvent::Succeeded(_) => "succeeded",
            SaveEvent::Failed(_) => "failed",
            SaveEvent::Invalid(_) => "invalid",
        };
        sink.lock().push(name.to_string());
    });
    seen
}

async fn settle(until: impl Fn() -> bool) {
    for _ in 0..100 {
        if until() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_all_strategy_submits_whole_tree() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone()).build().unwrap();
    root.set_data(Some(json!({"A": "a", "B": "b"})));

    let outcome = handler.save().await.unwrap();
    assert_matches!(outcome, SaveOutcome::Saved { committed: 0, .. });
    assert_eq!(proxy.submissions()[0].payload, json!({"A": "a", "B": "b"}));
}

#[tokio::test]
async fn test_changed_strategy_submits_changed_children_only() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    root.set_data(Some(json!({"A": "a", "B": "b", "C": "c"})));
    edit(&root, "B", "bee");

    let outcome = handler.save().await.unwrap();
    assert_matches!(outcome, SaveOutcome::Saved { committed: 1, .. });
    assert_eq!(proxy.submissions()[0].payload, json!({"B": "bee"}));
    assert!(handler.tracker().unwrap().is_empty());

    let again = handler.save().await.unwrap();
    assert_matches!(again, SaveOutcome::NothingToSave);
    assert_eq!(proxy.count(), 1);
}

#[tokio::test]
async fn test_changes_during_flight_survive_commit() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::gated());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    edit(&root, "A", "first");

    let (outcome, ()) = futures::join!(handler.save(), async {
        edit(&root, "B", "late");
        proxy.release(1);
    });

    assert_matches!(outcome.unwrap(), SaveOutcome::Saved { committed: 1, .. });
    assert_eq!(proxy.submissions()[0].payload, json!({"A": "first"}));
    let tracker = handler.tracker().unwrap();
    assert_eq!(tracker.len(), 1);
    assert!(tracker.is_dirty(&root.child("B").unwrap()));
}

#[tokio::test]
async fn test_same_node_edited_during_flight_stays_dirty() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::gated());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    edit(&root, "A", "first");

    let (outcome, ()) = futures::join!(handler.save(), async {
        edit(&root, "A", "second");
        proxy.release(1);
    });

    assert_matches!(outcome.unwrap(), SaveOutcome::Saved { committed: 0, .. });
    assert_eq!(proxy.submissions()[0].payload, json!({"A": "first"}));
    let tracker = handler.tracker().unwrap();
    assert!(tracker.is_dirty(&root.child("A").unwrap()));

    let (retry, ()) = futures::join!(handler.save(), async { proxy.release(1) });
    assert_matches!(retry.unwrap(), SaveOutcome::Saved { committed: 1, .. });
    assert_eq!(proxy.submissions()[1].payload, json!({"A": "second"}));
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn test_failed_submission_keeps_changes_for_retry() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    proxy.push_result(Err(CanopyError::transport("backend unavailable")));
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    let seen = record_events(&handler);
    edit(&root, "A", "x");

    let err = handler.save().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(handler.tracker().unwrap().len(), 1);

    handler.save().await.unwrap();
    assert!(handler.tracker().unwrap().is_empty());
    assert_eq!(proxy.count(), 2);
    assert_eq!(*seen.lock(), vec!["failed", "succeeded"]);
}

#[tokio::test]
async fn test_validation_blocks_submission() {
    let root = load(json!({
        "name": {"component": "required"},
        "note": {"component": "field"}
    }))
    .await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone()).build().unwrap();
    let seen = record_events(&handler);

    let err = handler.save().await.unwrap_err();
    assert_eq!(err.validation_errors().map(<[_]>::len), Some(1));
    assert_eq!(proxy.count(), 0);
    let name = root.child("name").unwrap();
    assert_eq!(name.component_as::<RequiredField>().unwrap().reactivated(), 1);

    root.set_data(Some(json!({"name": "Ann"})));
    handler.save().await.unwrap();
    assert_eq!(proxy.count(), 1);
    assert_eq!(*seen.lock(), vec!["invalid", "succeeded"]);
}

#[tokio::test]
async fn test_invisible_nodes_are_not_validated() {
    let root = load(json!({"name": {"component": "required"}})).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone()).build().unwrap();
    root.child("name")
        .unwrap()
        .set_option("visible", json!(false), false);

    handler.save().await.unwrap();
    assert_eq!(proxy.count(), 1);
}

#[tokio::test]
async fn test_backend_validation_errors_are_reported_as_invalid() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    proxy.push_result(Err(CanopyError::validation(vec![canopy_core::ValidationError::new(
        root.child("A").unwrap().id(),
        "taken",
    )])));
    let handler = SaveHandler::builder(root.clone(), proxy).build().unwrap();
    let seen = record_events(&handler);

    handler.save().await.unwrap_err();
    assert_eq!(*seen.lock(), vec!["invalid"]);
}

#[tokio::test]
async fn test_immediate_strategy_saves_each_change() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let _handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Immediate)
        .build()
        .unwrap();
    root.set_data(Some(json!({"A": "a", "B": "b"})));

    edit(&root, "A", "x");
    settle(|| proxy.count() == 1).await;
    edit(&root, "B", "y");
    settle(|| proxy.count() == 2).await;

    let payloads: Vec<Value> = proxy.submissions().into_iter().map(|s| s.payload).collect();
    assert_eq!(payloads, vec![json!({"A": "x"}), json!({"B": "y"})]);
}

#[tokio::test]
async fn test_none_strategy_never_submits() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::None)
        .build()
        .unwrap();
    assert_matches!(handler.save().await.unwrap(), SaveOutcome::Disabled);
    assert_eq!(proxy.count(), 0);
}

#[tokio::test]
async fn test_request_save_event_triggers_save() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let _handler = SaveHandler::builder(root.clone(), proxy.clone()).build().unwrap();

    root.child("C").unwrap().fire(REQUEST_SAVE, Value::Null);
    settle(|| proxy.count() == 1).await;
    assert_eq!(proxy.count(), 1);
}

#[tokio::test]
async fn test_outcomes_are_fired_on_the_bus() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    proxy.push_result(Ok(json!({"id": 9})));
    proxy.push_result(Err(CanopyError::transport("gone")));
    let handler = SaveHandler::builder(root.clone(), proxy).build().unwrap();

    let fired = Arc::new(Mutex::new(Vec::new()));
    let bus = root.bus().unwrap();
    for name in [SAVE_SUCCESS, SAVE_ERROR] {
        let fired = fired.clone();
        bus.on(name, move |event| {
            fired.lock().push((event.name.clone(), event.payload.clone()));
        });
    }

    handler.save().await.unwrap();
    handler.save().await.unwrap_err();
    let fired = fired.lock();
    assert_eq!(fired[0], (SAVE_SUCCESS.to_string(), json!({"id": 9})));
    assert_eq!(fired[1].0, SAVE_ERROR);
}

#[tokio::test]
async fn test_prepare_hook_shapes_the_submission() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .prepare(|root, data| {
            Ok(PreparedSave {
                payload: json!({ "record": data }),
                metadata: Some(json!({ "root": root.id().to_string() })),
            })
        })
        .build()
        .unwrap();
    root.set_data(Some(json!({"A": "a"})));

    handler.save().await.unwrap();
    let submission = &proxy.submissions()[0];
    assert_eq!(submission.payload, json!({"record": {"A": "a"}}));
    assert!(submission.metadata.is_some());
}

#[tokio::test]
async fn test_save_after_destroy_is_refused() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::new());
    let handler = SaveHandler::builder(root.clone(), proxy.clone()).build().unwrap();
    root.destroy();
    assert_matches!(handler.save().await, Err(CanopyError::Destroyed { .. }));
    assert_eq!(proxy.count(), 0);
}

#[tokio::test]
async fn test_completion_on_destroyed_root_is_ignored() {
    let root = load(form()).await;
    let proxy = Arc::new(MockSaveProxy::gated());
    let handler = SaveHandler::builder(root.clone(), proxy.clone())
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    edit(&root, "A", "x");
    let seen = record_events(&handler);

    let (outcome, ()) = futures::join!(handler.save(), async {
        root.destroy();
        proxy.release(1);
    });
    assert_matches!(outcome.unwrap(), SaveOutcome::Ignored { .. });
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_busy_indicator_wraps_submission() {
    let root = load(form()).await;
    let (busy, factory) = test_busy_indicator();
    let handler = SaveHandler::builder(root.clone(), Arc::new(MockSaveProxy::new()))
        .with_busy_indicator(busy.clone())
        .build()
        .unwrap();

    handler.save().await.unwrap();
    assert_eq!(busy.count(), 0);
    assert_eq!(factory.spinner().hides(), factory.spinner().shows());
}

#[tokio::test]
async fn test_disabled_busy_config_suppresses_indicator() {
    let root = load(form()).await;
    let (busy, factory) = test_busy_indicator();
    let config = BusyConfig { enabled: false };
    let handler = SaveHandler::builder(root.clone(), Arc::new(MockSaveProxy::new()))
        .with_busy_config(&config)
        .with_busy_indicator(busy)
        .build()
        .unwrap();

    handler.save().await.unwrap();
    assert_eq!(factory.created(), 0);
    assert_eq!(factory.spinner().shows(), 0);
}
