//! Change tracking on loaded trees.

use canopy_core::SaveStrategyKind;
use canopy_flow::events::DISCARD_CHANGES;
use canopy_flow::{ChangeTracker, SaveHandler, TrackerEvent, TrackingMode};
use canopy_testkit::*;
use canopy_tree::{LifecycleOrchestrator, MountTarget, NodeRef};
use parking_lot::Mutex;
use proptest::prelude::*;
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

fn nested() -> Value {
    json!({
        "A": {"component": "field"},
        "B": {
            "component": "group",
            "options": {"children": {"street": {"component": "field"}}}
        },
        "C": {"component": "field"}
    })
}

fn changed_tracker(root: &NodeRef) -> Arc<ChangeTracker> {
    let tracker = ChangeTracker::for_bus(&root.bus().unwrap(), TrackingMode::Changed).unwrap();
    tracker.track_tree(root, &[]);
    tracker
}

#[tokio::test]
async fn test_repeated_changes_are_deduplicated() {
    let root = load(nested()).await;
    let tracker = changed_tracker(&root);
    let a = root.child("A").unwrap();
    let street = root.child("B").unwrap().child("street").unwrap();

    a.mark_modified();
    street.mark_modified();
    a.mark_modified();

    assert_eq!(tracker.len(), 2);
    let bag = tracker.changes_bag(&root);
    let children: Vec<_> = bag.changed_children().iter().map(|c| c.key()).collect();
    assert_eq!(children, vec![Some("A".to_string()), Some("B".to_string())]);
}

#[tokio::test]
async fn test_declared_modification_events_are_tracked() {
    let root = load(nested()).await;
    let tracker = changed_tracker(&root);
    let c = root.child("C").unwrap();

    c.fire(FIELD_EDITED, Value::Null);
    assert!(tracker.is_dirty(&c));
    root.child("B").unwrap().fire("unrelated", Value::Null);
    assert_eq!(tracker.len(), 1);
}

#[tokio::test]
async fn test_became_dirty_fires_once_per_clean_period() {
    let root = load(nested()).await;
    let tracker = changed_tracker(&root);
    let seen = Arc::new(Mutex::new(0usize));
    let counter = seen.clone();
    tracker.subscribe(move |event| {
        if matches!(event, TrackerEvent::BecameDirty) {
            *counter.lock() += 1;
        }
    });

    root.child("A").unwrap().mark_modified();
    root.child("C").unwrap().mark_modified();
    assert_eq!(*seen.lock(), 1);

    tracker.clear();
    root.child("C").unwrap().mark_modified();
    assert_eq!(*seen.lock(), 2);
}

#[tokio::test]
async fn test_one_tracker_per_bus() {
    let root = load(nested()).await;
    let bus = root.bus().unwrap();
    let first = ChangeTracker::for_bus(&bus, TrackingMode::Changed).unwrap();
    let again = ChangeTracker::for_bus(&bus, TrackingMode::Changed).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert!(ChangeTracker::for_bus(&bus, TrackingMode::Immediate).is_err());
}

#[tokio::test]
async fn test_destroyed_nodes_leave_the_dirty_set() {
    let root = load(nested()).await;
    let tracker = changed_tracker(&root);
    let a = root.child("A").unwrap();
    a.mark_modified();
    assert_eq!(tracker.len(), 1);

    root.remove_child("A");
    drop(a);
    assert!(tracker.is_empty());
    assert!(tracker.changes_bag(&root).is_empty());
}

#[tokio::test]
async fn test_discard_event_clears_changes() {
    let root = load(nested()).await;
    let handler = SaveHandler::builder(root.clone(), Arc::new(MockSaveProxy::new()))
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    root.child("A").unwrap().mark_modified();
    let tracker = handler.tracker().unwrap();
    assert_eq!(tracker.len(), 1);

    root.fire(DISCARD_CHANGES, Value::Null);
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn test_initialize_with_data_model_marks_receivers() {
    let root = load(nested()).await;
    let handler = SaveHandler::builder(root.clone(), Arc::new(MockSaveProxy::new()))
        .strategy(SaveStrategyKind::Changed)
        .build()
        .unwrap();
    let data = json!({"A": "x", "B": {"street": "Main"}, "C": null, "other": 1});
    root.set_data(Some(data.clone()));

    assert_eq!(handler.initialize_with_data_model(&data), 2);
    let tracker = handler.tracker().unwrap();
    assert!(tracker.is_dirty(&root.child("A").unwrap()));
    assert!(!tracker.is_dirty(&root.child("C").unwrap()));
}

proptest! {
    #[test]
    fn prop_bags_of_disjoint_subtrees_commit_independently(
        marks in proptest::collection::vec(0usize..3, 1..10)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let root = load(json!({
                "left": {
                    "component": "group",
                    "options": {"children": {"x": {"component": "field"}, "y": {"component": "field"}}}
                },
                "right": {
                    "component": "group",
                    "options": {"children": {"z": {"component": "field"}}}
                }
            }))
            .await;
            let tracker = changed_tracker(&root);
            let left = root.child("left").unwrap();
            let right = root.child("right").unwrap();
            let leaves = [
                left.child("x").unwrap(),
                left.child("y").unwrap(),
                right.child("z").unwrap(),
            ];
            for mark in &marks {
                leaves[*mark].mark_modified();
            }
            let right_dirty = marks.contains(&2);
            let left_bag = tracker.changes_bag(&left);
            left_bag.commit();

            assert_eq!(tracker.is_dirty(&leaves[2]), right_dirty);
            assert!(!tracker.is_dirty(&leaves[0]));
            assert!(!tracker.is_dirty(&leaves[1]));
        });
    }
}
