mod common;

use busdev_core::SyncTag;
use busdev_sdk::{ConfigChange, DeviceEvent, DeviceHandle};
use common::{advance_one_interval, bridge_class_spec, bring_up_bridge, harness_with_handler};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn creates_bridge_with_two_members() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    let eth0 = harness.registry.add_device("eth0", false);
    let eth1 = harness.registry.add_device("eth1", false);

    adapter
        .create("br0", json!({ "ifname": ["eth0", "eth1"] }))
        .await
        .unwrap();
    adapter.config_init("br0").await.unwrap();

    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.members.len(), 2);
    assert_eq!(snap.sync, SyncTag::Synced);
    assert_eq!(snap.n_present, 0);
    assert!(harness.bus.calls_for("create").is_empty());

    // the first member's appearance triggers the remote bridge creation
    eth0.set_present(true);
    adapter.handle_device_event("eth0", DeviceEvent::Add).await;
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.sync, SyncTag::PendingCreate);
    let creates = harness.bus.calls_for("create");
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].args, json!({ "ifname": ["eth0", "eth1"] }));

    // the second member queues up behind the unconfirmed bridge
    eth1.set_present(true);
    adapter.handle_device_event("eth1", DeviceEvent::Add).await;
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.n_present, 1);
    assert_eq!(snap.n_failed, 1);
    assert!(harness.bus.calls_for("add").is_empty());

    adapter
        .handle_notification("create", &json!({ "devices": ["br0"] }))
        .await
        .unwrap();
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.sync, SyncTag::Synced);
    assert!(snap.active);
    assert!(!snap.timer_armed);
    assert_eq!(
        harness.registry.activator_mock("br0").transitions(),
        vec![true]
    );
    let br0 = harness.registry.device("br0").unwrap();
    assert!(br0.present());

    // the scheduled walk attaches both members
    advance_one_interval().await;
    let adds = harness.bus.calls_for("add");
    assert_eq!(adds.len(), 2);
    assert!(adds
        .iter()
        .any(|c| c.args == json!({ "bridge": "br0", "member": "eth0" })));
    assert!(adds
        .iter()
        .any(|c| c.args == json!({ "bridge": "br0", "member": "eth1" })));
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.n_present, 2);
    for member in &snap.members {
        assert_eq!(member.sync, SyncTag::PendingAdd);
        assert!(member.present);
        assert!(member.claimed);
    }

    adapter
        .handle_notification("add", &json!({ "bridge": "br0", "member": "eth0" }))
        .await
        .unwrap();
    adapter
        .handle_notification("add", &json!({ "bridge": "br0", "member": "eth1" }))
        .await
        .unwrap();
    let snap = adapter.bridge_snapshot("br0").unwrap();
    for member in &snap.members {
        assert_eq!(member.sync, SyncTag::Synced);
        assert!(!member.timer_armed);
    }
    assert_eq!(br0.broadcasts_of(DeviceEvent::TopologyChange), 2);
    // presence bookkeeping matches the membership
    assert_eq!(
        snap.n_present,
        snap.members.iter().filter(|m| m.present).count()
    );
}

#[tokio::test(start_paused = true)]
async fn creates_empty_bridge_immediately() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();

    adapter.create("br1", json!({ "empty": true })).await.unwrap();
    adapter.config_init("br1").await.unwrap();

    let snap = adapter.bridge_snapshot("br1").unwrap();
    assert_eq!(snap.sync, SyncTag::PendingCreate);
    assert!(snap.force_active);
    assert!(snap.empty);
    assert!(snap.timer_armed);
    let br1 = harness.registry.device("br1").unwrap();
    assert!(br1.present());
    assert_eq!(harness.bus.calls_for("create").len(), 1);

    adapter
        .handle_notification("create", &json!({ "devices": ["br1"] }))
        .await
        .unwrap();
    let snap = adapter.bridge_snapshot("br1").unwrap();
    assert_eq!(snap.sync, SyncTag::Synced);
    assert!(snap.active);
    assert!(!snap.timer_armed);
    assert_eq!(
        harness.registry.activator_mock("br1").transitions(),
        vec![true]
    );
}

#[tokio::test(start_paused = true)]
async fn set_down_keeps_the_record_and_free_destroys_it() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    bring_up_bridge(&harness, &adapter, "br0", &["eth0"]).await;
    harness.bus.clear_calls();

    // set_down disables members, frees the remote bridge, keeps the shadow
    adapter.set_state("br0", false).await.unwrap();
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.sync, SyncTag::PendingDisable);
    assert!(!snap.active);
    assert_eq!(harness.bus.calls_for("remove").len(), 1);
    let frees = harness.bus.calls_for("free");
    assert_eq!(frees.len(), 1);
    assert_eq!(frees[0].args, json!({ "name": "br0" }));
    assert_eq!(
        harness.registry.activator_mock("br0").transitions(),
        vec![true, false]
    );

    adapter
        .handle_notification("free", &json!({ "devices": ["br0"] }))
        .await
        .unwrap();
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.sync, SyncTag::Synced);
    assert!(!snap.active);
    assert!(!snap.timer_armed);

    // an adapter-level free destroys the shadow once confirmed
    harness.bus.clear_calls();
    adapter.free("br0").await.unwrap();
    assert_eq!(adapter.bridge_snapshot("br0").unwrap().sync, SyncTag::PendingFree);
    assert_eq!(harness.bus.calls_for("free").len(), 1);

    adapter
        .handle_notification("free", &json!({ "devices": ["br0"] }))
        .await
        .unwrap();
    assert!(adapter.bridge_snapshot("br0").is_none());
}

#[tokio::test(start_paused = true)]
async fn unsolicited_free_disables_a_synced_bridge() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    bring_up_bridge(&harness, &adapter, "br0", &["eth0"]).await;

    // the handler dropped the bridge on its own: disable, keep the record
    adapter
        .handle_notification("free", &json!({ "devices": ["br0"] }))
        .await
        .unwrap();
    let snap = adapter.bridge_snapshot("br0").unwrap();
    assert_eq!(snap.sync, SyncTag::Synced);
    assert!(!snap.active);
}

#[tokio::test(start_paused = true)]
async fn set_up_without_members_is_rejected() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    adapter
        .create("br0", json!({ "ifname": ["eth0"] }))
        .await
        .unwrap();
    adapter.config_init("br0").await.unwrap();

    // no member is present and the bridge is not forced active
    assert!(adapter.set_state("br0", true).await.is_err());
    assert!(harness.bus.calls_for("create").is_empty());
}

#[tokio::test(start_paused = true)]
async fn member_event_without_device_presence_fails_the_enable() {
    let harness = harness_with_handler();
    let adapter = harness
        .plugin
        .register_class(bridge_class_spec())
        .await
        .unwrap();
    bring_up_bridge(&harness, &adapter, "br0", &["eth0"]).await;

    // grow the configured member list; eth1's device never shows up
    let change = adapter
        .reload("br0", json!({ "ifname": ["eth0", "eth1"] }))
        .await
        .unwrap();
    assert_eq!(change, ConfigChange::Restart);
    adapter
        .handle_notification("reload", &json!({ "devices": ["br0"] }))
        .await
        .unwrap();
    adapter.config_init("br0").await.unwrap();
    harness.bus.clear_calls();

    // a stray add event for a device that is not actually present
    adapter.handle_device_event("eth1", DeviceEvent::Add).await;
    let snap = adapter.bridge_snapshot("br0").unwrap();
    let eth1 = snap.member("eth1").unwrap();
    assert!(!eth1.present);
    assert!(!eth1.claimed);
    assert_eq!(eth1.sync, SyncTag::PendingAdd);
    assert_eq!(snap.n_failed, 1);
    assert_eq!(snap.n_present, 1);
    assert!(harness.bus.calls_for("add").is_empty());
    assert_eq!(harness.registry.device("eth1").unwrap().claims(), 0);
}
