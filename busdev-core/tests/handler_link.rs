mod common;

use busdev_core::LinkState;
use busdev_sdk::ConfigChange;
use common::{bridge_class_spec, bring_up_bridge, harness_with_handler, harness_without_handler, ENDPOINT};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn class_installs_unsubscribed_when_handler_is_absent() {
    let harness = harness_without_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();

    assert_eq!(adapter.class().link().state(), LinkState::Unresolved);
    assert!(harness.bus.watch_count() >= 1);
    assert_eq!(harness.bus.subscribe_count(), 0);

    // adapter entry points reject without touching local state
    let err = adapter
        .create("br0", json!({ "empty": true }))
        .await
        .unwrap_err();
    assert!(err.is_handler_absent());
    assert!(adapter.bridge_snapshot("br0").is_none());
    assert!(harness.bus.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn publishing_the_endpoint_triggers_exactly_one_subscribe() {
    let harness = harness_without_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();

    harness.bus.add_object(ENDPOINT);
    harness.plugin.handle_object_added(ENDPOINT).await;
    assert_eq!(harness.bus.subscribe_count(), 1);
    assert_eq!(adapter.class().link().state(), LinkState::Subscribed);

    // repeated object-added events for the same endpoint collapse
    harness.plugin.handle_object_added(ENDPOINT).await;
    harness.plugin.handle_object_added(ENDPOINT).await;
    assert_eq!(harness.bus.subscribe_count(), 1);

    // events for unrelated objects are ignored
    harness.plugin.handle_object_added("some.other.object").await;
    assert_eq!(harness.bus.subscribe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn handler_disappearance_blocks_operations_until_resubscribe() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    bring_up_bridge(&harness, &adapter, "br0", &["eth0"]).await;
    harness.bus.clear_calls();

    adapter.handler_gone().await;
    assert_eq!(adapter.class().link().state(), LinkState::Waiting);

    // a reload while unsubscribed degrades to no change and issues no RPC
    let change = adapter
        .reload("br0", json!({ "ifname": ["eth0", "eth1"] }))
        .await
        .unwrap();
    assert_eq!(change, ConfigChange::NoChange);
    assert!(harness.bus.calls().is_empty());

    // a create is rejected outright
    let err = adapter
        .create("br9", json!({ "empty": true }))
        .await
        .unwrap_err();
    assert!(err.is_handler_absent());

    // the handler comes back: one subscription renewal, no automatic reload
    let before = harness.bus.subscribe_count();
    harness.plugin.handle_object_added(ENDPOINT).await;
    assert_eq!(harness.bus.subscribe_count(), before + 1);
    assert_eq!(adapter.class().link().state(), LinkState::Subscribed);
    assert!(harness.bus.calls_for("reload").is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_class_registration_is_rejected() {
    let harness = harness_with_handler();
    harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    assert!(harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .is_err());
    assert_eq!(harness.plugin.class_names(), vec!["ubr".to_string()]);
}
