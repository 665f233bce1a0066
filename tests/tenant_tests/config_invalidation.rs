//! Stories about ConfigMap changes reaching cached tenant contexts

use std::sync::Arc;

use tenant_bridge::tenant::{ConfigEvent, SubscriptionState, TenantId};

use super::helpers::{eventually, Bridge, FakeConfigSource};

const TENANT: TenantId = TenantId::new(42);
const CONFIG: &str = "42-mt-config";

fn applied(version: &str) -> ConfigEvent {
    ConfigEvent::Applied {
        resource_version: Some(version.to_string()),
    }
}

/// Story: An operator edits a tenant's ConfigMap
///
/// Expected behavior:
/// - The cached context is dropped as soon as the change is observed
/// - The next request builds a context from the new settings
/// - The subscription stays active
#[tokio::test]
async fn story_config_edit_reaches_next_request() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite(CONFIG, "/data/old.db", "1");
    let bridge = Bridge::start(source.clone());

    let before = bridge.cache.get_or_build(TENANT).await;
    assert_eq!(before.session().unwrap().descriptor(), "sqlite:///data/old.db");
    eventually(|| source.watch_count(CONFIG) == 1).await;

    source.put_sqlite(CONFIG, "/data/new.db", "2");
    source.emit(CONFIG, applied("2"));
    eventually(|| !bridge.cache.contains(TENANT)).await;

    let after = bridge.cache.get_or_build(TENANT).await;
    assert_eq!(after.session().unwrap().descriptor(), "sqlite:///data/new.db");
    assert_eq!(bridge.subscriptions.state(TENANT), SubscriptionState::Active);
    assert_eq!(source.watch_count(CONFIG), 1);

    bridge.stop().await;
}

/// Story: The watch replays the object the context was built from
///
/// Seeing the same resourceVersion again must not throw the context away.
#[tokio::test]
async fn story_replayed_version_keeps_context() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite(CONFIG, "/data/t42.db", "7");
    let bridge = Bridge::start(source.clone());

    let ctx = bridge.cache.get_or_build(TENANT).await;
    eventually(|| source.watch_count(CONFIG) == 1).await;

    source.emit(CONFIG, applied("7"));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let again = bridge.cache.get_or_build(TENANT).await;
    assert!(Arc::ptr_eq(&ctx, &again));
    assert_eq!(source.fetches(), 1);

    bridge.stop().await;
}

/// Story: A tenant's ConfigMap is deleted
///
/// Expected behavior:
/// - The cached context is dropped and the subscription closes
/// - The next request gets a degraded context and subscribes again, so a
///   recreated ConfigMap is picked up
#[tokio::test]
async fn story_deleted_config_degrades_and_resubscribes() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite(CONFIG, "/data/t42.db", "1");
    let bridge = Bridge::start(source.clone());

    bridge.cache.get_or_build(TENANT).await;
    eventually(|| bridge.subscriptions.state(TENANT) == SubscriptionState::Active).await;

    source.remove(CONFIG);
    source.emit(CONFIG, ConfigEvent::Deleted);
    eventually(|| bridge.subscriptions.state(TENANT) == SubscriptionState::Closed).await;
    assert!(!bridge.cache.contains(TENANT));

    let degraded = bridge.cache.get_or_build(TENANT).await;
    assert!(degraded.is_degraded());
    eventually(|| source.watch_count(CONFIG) == 2).await;
    eventually(|| bridge.subscriptions.state(TENANT) == SubscriptionState::Active).await;

    source.put_sqlite(CONFIG, "/data/restored.db", "3");
    source.emit(CONFIG, applied("3"));
    eventually(|| !bridge.cache.contains(TENANT)).await;

    let restored = bridge.cache.get_or_build(TENANT).await;
    assert!(!restored.is_degraded());

    bridge.stop().await;
}

/// Story: The process shuts down with tenants subscribed
#[tokio::test]
async fn story_shutdown_closes_all_subscriptions() {
    let source = Arc::new(FakeConfigSource::default());
    for id in 1..=4 {
        source.put_sqlite(&format!("{id}-mt-config"), "/data/t.db", "1");
    }
    let bridge = Bridge::start(source);

    for id in 1..=4 {
        bridge.cache.get_or_build(TenantId::new(id)).await;
    }
    eventually(|| bridge.subscriptions.len() == 4).await;

    let subscriptions = bridge.subscriptions.clone();
    bridge.stop().await;
    assert!(subscriptions.is_empty());
}
