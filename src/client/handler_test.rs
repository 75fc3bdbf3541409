use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use super::*;
use crate::test_utils::hub_resource;
use crate::test_utils::recv_within;
use crate::GenericResource;
use crate::ResourceAction;
use crate::WatcherStore;

#[tokio::test]
async fn test_channel_handler_forwards() {
    let (tx, mut rx) = mpsc::channel(4);

    tx.on_event(ResourceAction::Added, hub_resource("c1", "a", "A", 1))
        .await
        .unwrap();

    let (action, resource) = recv_within(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(action, ResourceAction::Added);
    assert_eq!(resource.metadata.uid, "A");
}

#[tokio::test]
async fn test_channel_handler_fails_when_closed() {
    let (tx, rx) = mpsc::channel::<(ResourceAction, GenericResource)>(1);
    drop(rx);

    assert!(tx
        .on_event(ResourceAction::Added, hub_resource("c1", "a", "A", 1))
        .await
        .is_err());
}

#[tokio::test]
async fn test_store_handler_applies_before_forwarding() {
    let store = WatcherStore::<GenericResource>::default();
    let (tx, mut rx) = mpsc::channel(4);
    let handler = StoreHandler::new(store.clone()).forward_to(Arc::new(tx));

    handler
        .on_event(ResourceAction::Added, hub_resource("c1", "a", "A", 1))
        .await
        .unwrap();
    assert!(store.get("c1", "a").is_some());
    let (action, _) = recv_within(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(action, ResourceAction::Added);

    let mut deleted = hub_resource("c1", "a", "A", 1);
    deleted.metadata.deletion_timestamp = Some(Utc::now());
    handler
        .on_event(ResourceAction::Deleted, deleted)
        .await
        .unwrap();
    assert!(store.get("c1", "a").is_none());
    let (action, _) = recv_within(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(action, ResourceAction::Deleted);
}

#[tokio::test]
async fn test_store_handler_rejects_invalid_resources() {
    let store = WatcherStore::<GenericResource>::default();
    let handler = StoreHandler::new(store.clone());

    let nameless = hub_resource("c1", "", "A", 1);
    assert!(handler
        .on_event(ResourceAction::Added, nameless)
        .await
        .is_err());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_store_handler_drops_changes_the_store_ignores() {
    let store = WatcherStore::<GenericResource>::default();
    let (tx, mut rx) = mpsc::channel(4);
    let handler = StoreHandler::new(store.clone()).forward_to(Arc::new(tx));

    handler
        .on_event(ResourceAction::Added, hub_resource("c1", "a", "A", 2))
        .await
        .unwrap();
    recv_within(&mut rx, Duration::from_secs(1)).await;

    handler
        .on_event(ResourceAction::Modified, hub_resource("c1", "a", "A", 1))
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(store.get("c1", "a").unwrap().metadata.resource_version, "2");
}
