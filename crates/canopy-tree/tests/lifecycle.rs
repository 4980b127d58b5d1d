//! Lifecycle orchestration across whole trees.

use assert_matches::assert_matches;
use canopy_core::{CanopyConfig, CanopyError};
use canopy_testkit::*;
use canopy_tree::{LifecycleOrchestrator, LifecycleState, MountTarget, NodeRef};
use serde_json::{json, Value};
use std::sync::Arc;

struct Fixture {
    log: PhaseLog,
    transport: Arc<EchoTransport>,
    orchestrator: LifecycleOrchestrator,
    errors: Arc<RecordingErrorDisplay>,
}

fn fixture() -> Fixture {
    init_tracing();
    let log = PhaseLog::new();
    let transport = Arc::new(EchoTransport::new());
    let errors = Arc::new(RecordingErrorDisplay::new());
    let orchestrator =
        LifecycleOrchestrator::builder(Arc::new(test_registry(&log)), manager_with(transport.clone()))
            .with_error_display(errors.clone())
            .build();
    Fixture {
        log,
        transport,
        orchestrator,
        errors,
    }
}

fn profile_children() -> Value {
    json!({
        "name": {"component": "field", "options": {"l10n": "common"}},
        "address": {
            "component": "group",
            "options": {
                "children": {
                    "street": {"component": "field", "options": {"l10n": "common"}},
                    "city": {"component": "field", "options": {"l10n": "common"}}
                }
            },
            "extendedOptions": {
                "city": {"options": {"label": "Town"}}
            }
        }
    })
}

fn target() -> (Arc<RecordingMountTarget>, Vec<Arc<dyn MountTarget>>) {
    let target = Arc::new(RecordingMountTarget::new());
    let targets: Vec<Arc<dyn MountTarget>> = vec![target.clone()];
    (target, targets)
}

async fn loaded(fx: &Fixture) -> NodeRef {
    let root = group_root(&fx.log, profile_children());
    let (_, targets) = target();
    fx.orchestrator.load(&root, json!({"id": 1}), &targets).await.unwrap();
    root
}

#[tokio::test]
async fn test_load_runs_every_phase_and_mounts_once() {
    let fx = fixture();
    let root = group_root(&fx.log, profile_children());
    let (target, targets) = target();

    fx.orchestrator.load(&root, Value::Null, &targets).await.unwrap();

    assert_eq!(root.state(), LifecycleState::Mounted);
    assert_eq!(target.commits(), vec![(root.id(), LifecycleState::Configured)]);
    assert!(root.bus().is_some());

    let address = root.child("address").unwrap();
    let street = address.child("street").unwrap();
    assert!(Arc::ptr_eq(&street.bus().unwrap(), &root.bus().unwrap()));
    assert_eq!(street.parent().unwrap().id(), address.id());
}

#[tokio::test]
async fn test_configure_runs_parent_first() {
    let fx = fixture();
    let _root = loaded(&fx).await;

    let root_at = fx.log.position("configure:root").unwrap();
    let address_at = fx.log.position("configure:address").unwrap();
    let street_at = fx.log.position("configure:street").unwrap();
    assert!(root_at < address_at);
    assert!(address_at < street_at);
    assert_eq!(fx.log.entries().len(), 5);
}

#[tokio::test]
async fn test_resources_are_fetched_once_per_distinct_key() {
    let fx = fixture();
    let _root = loaded(&fx).await;

    assert_eq!(fx.transport.calls(), 1);
    assert_eq!(fx.transport.times_requested("l10n", "common"), 1);
    assert_eq!(fx.transport.times_requested("templates", "field"), 1);
    assert_eq!(fx.transport.times_requested("templates", "group"), 1);
}

#[tokio::test]
async fn test_second_tree_reuses_cached_resources() {
    let fx = fixture();
    let _first = loaded(&fx).await;
    let _second = loaded(&fx).await;
    assert_eq!(fx.transport.calls(), 1);
    assert_eq!(
        fx.orchestrator
            .resources()
            .get(canopy_resource::ResourceKind::Localization, "common"),
        Some(json!("l10n:common"))
    );
}

#[tokio::test]
async fn test_extended_options_reach_grandchildren() {
    let fx = fixture();
    let root = loaded(&fx).await;
    let city = root.child("address").unwrap().child("city").unwrap();
    assert_eq!(city.option("label"), Some(json!("Town")));
    assert!(fx.log.position("configure:Town").is_some());
}

#[tokio::test]
async fn test_mount_target_count_must_be_one() {
    let fx = fixture();

    let root = group_root(&fx.log, profile_children());
    let err = fx.orchestrator.load(&root, Value::Null, &[]).await.unwrap_err();
    assert_matches!(err, CanopyError::Structural { .. });
    assert_eq!(fx.transport.calls(), 0);

    let other = group_root(&fx.log, profile_children());
    let a: Arc<dyn MountTarget> = Arc::new(RecordingMountTarget::new());
    let b: Arc<dyn MountTarget> = Arc::new(RecordingMountTarget::new());
    let err = fx.orchestrator.load(&other, Value::Null, &[a, b]).await.unwrap_err();
    assert_matches!(err, CanopyError::Structural { .. });
    assert!(fx.log.entries().is_empty());
}

#[tokio::test]
async fn test_load_is_only_valid_on_fresh_roots() {
    let fx = fixture();
    let root = loaded(&fx).await;
    let (_, targets) = target();

    let again = fx.orchestrator.load(&root, Value::Null, &targets).await;
    assert_matches!(again, Err(CanopyError::Structural { .. }));

    let child = root.child("name").unwrap();
    let on_child = fx.orchestrator.load(&child, Value::Null, &targets).await;
    assert_matches!(on_child, Err(CanopyError::Structural { .. }));
}

#[tokio::test]
async fn test_empty_children_definition_aborts() {
    let fx = fixture();
    let root = group_root(&fx.log, json!({}));
    let (target, targets) = target();

    let err = fx.orchestrator.load(&root, Value::Null, &targets).await.unwrap_err();
    assert_matches!(err, CanopyError::Structural { .. });
    assert_eq!(root.state(), LifecycleState::Errored);
    assert_eq!(target.count(), 0);
    assert_eq!(fx.errors.shown().len(), 1);
}

#[tokio::test]
async fn test_unknown_component_type_is_reported() {
    let fx = fixture();
    let root = group_root(&fx.log, json!({"x": {"component": "nope"}}));
    let (_, targets) = target();

    let err = fx.orchestrator.load(&root, Value::Null, &targets).await.unwrap_err();
    assert_matches!(err, CanopyError::Structural { ref message } if message.contains("nope"));
    assert_eq!(fx.errors.shown()[0].1, err);
}

#[tokio::test]
async fn test_malformed_resources_degrade_but_mount() {
    let fx = fixture();
    fx.transport.set_mode(EchoMode::Malformed);
    let root = group_root(&fx.log, profile_children());
    let (target, targets) = target();

    fx.orchestrator.load(&root, Value::Null, &targets).await.unwrap();
    assert_eq!(root.state(), LifecycleState::Mounted);
    assert_eq!(target.count(), 1);
    assert!(fx.errors.shown().is_empty());
}

#[tokio::test]
async fn test_transport_failure_aborts_load() {
    let fx = fixture();
    fx.transport.set_mode(EchoMode::Fail);
    let root = group_root(&fx.log, profile_children());
    let (target, targets) = target();

    let err = fx.orchestrator.load(&root, Value::Null, &targets).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(root.state(), LifecycleState::Errored);
    assert_eq!(target.count(), 0);
    assert_eq!(fx.errors.shown().len(), 1);
}

#[tokio::test]
async fn test_busy_indicator_is_balanced_after_load() {
    let log = PhaseLog::new();
    let transport = Arc::new(EchoTransport::new());
    let (busy, factory) = test_busy_indicator();
    let orchestrator =
        LifecycleOrchestrator::builder(Arc::new(test_registry(&log)), manager_with(transport))
            .with_busy_indicator(busy.clone())
            .build();
    let root = group_root(&log, profile_children());
    let (_, targets) = target();

    orchestrator.load(&root, Value::Null, &targets).await.unwrap();
    assert_eq!(busy.count(), 0);
    assert!(!busy.is_displayed());
    assert_eq!(factory.spinner().shows(), 1);
    assert_eq!(factory.spinner().hides(), 1);
}

#[tokio::test]
async fn test_destroy_tears_down_subtree() {
    let fx = fixture();
    let root = loaded(&fx).await;
    let address = root.child("address").unwrap();
    let street = address.child("street").unwrap();

    root.remove_child("address");
    assert!(address.is_destroyed());
    assert!(street.is_destroyed());
    assert!(root.child("address").is_none());
    assert!(!root.contains(&street));
}

#[tokio::test]
async fn test_root_destroyed_while_resources_load_is_never_wired() {
    init_tracing();
    let log = PhaseLog::new();
    let transport = Arc::new(EchoTransport::gated());
    let errors = Arc::new(RecordingErrorDisplay::new());
    let orchestrator =
        LifecycleOrchestrator::builder(Arc::new(test_registry(&log)), manager_with(transport.clone()))
            .with_error_display(errors.clone())
            .build();
    let root = group_root(&log, profile_children());
    let (target, targets) = target();

    let (result, ()) = futures::join!(orchestrator.load(&root, Value::Null, &targets), async {
        for _ in 0..100 {
            if transport.calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        root.destroy();
        transport.release(1);
    });

    assert_matches!(result, Err(CanopyError::Destroyed { node }) if node == root.id());
    assert!(root.bus().is_none());
    assert!(log.entries().is_empty());
    assert_eq!(target.count(), 0);
    assert!(errors.shown().is_empty());
}

#[tokio::test]
async fn test_disabled_busy_config_suppresses_indicator() {
    let log = PhaseLog::new();
    let (busy, factory) = test_busy_indicator();
    let config = CanopyConfig::from_toml_str("[busy]\nenabled = false\n").unwrap();
    let orchestrator = LifecycleOrchestrator::builder(
        Arc::new(test_registry(&log)),
        manager_with(Arc::new(EchoTransport::new())),
    )
    .with_busy_indicator(busy)
    .with_config(&config)
    .build();
    assert!(orchestrator.busy_indicator().is_none());

    let root = group_root(&log, profile_children());
    let (_, targets) = target();
    orchestrator.load(&root, Value::Null, &targets).await.unwrap();
    assert_eq!(factory.created(), 0);
    assert_eq!(factory.spinner().shows(), 0);
}
