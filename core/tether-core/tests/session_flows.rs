//! End-to-end flows through the public API: isolation between users, restart
//! survival through the file store, and rollback bookkeeping across sessions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tether_core::durable::{load_json, save_json};
use tether_core::stream::StreamRecord;
use tether_core::testing::{conversation, seed_stream_record, FakeApi, FakeTransport, ManualClock};
use tether_core::{
    Clock, ClientNotice, ClientOptions, DurableStore, FileStore, MemoryStore, SessionClient,
    SessionRegistry, StorageConfig, StoreKey, StreamPhase,
};
use tether_protocol::{OutboundMessage, RollbackResponse};

fn client_over(
    store: Arc<dyn DurableStore>,
    clock: &ManualClock,
    user_id: &str,
) -> (SessionClient, FakeTransport, FakeApi) {
    let transport = FakeTransport::new();
    let api = FakeApi::new();
    let client = SessionClient::new(
        ClientOptions::new(user_id),
        Box::new(transport.clone()),
        Box::new(api.clone()),
        store,
        Box::new(clock.clone()),
    )
    .expect("client");
    (client, transport, api)
}

#[test]
fn users_sharing_a_store_never_see_each_others_sessions() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());

    let (alice, _, _) = client_over(Arc::clone(&store), &clock, "alice");
    let (bob, _, _) = client_over(Arc::clone(&store), &clock, "bob");
    assert_ne!(alice.session_id(), bob.session_id());

    // A binding written into alice's slot by someone else is refused.
    let registry = SessionRegistry::new(Arc::clone(&store));
    let forged = json!({
        "session_id": bob.session_id(),
        "user_id": "bob",
        "bound_at": clock.now(),
    });
    save_json(store.as_ref(), &StoreKey::session_id("alice"), &forged).expect("forge");

    let resolved = registry
        .resolve_session("alice", clock.now())
        .expect("resolve");
    assert_ne!(resolved, bob.session_id());
}

#[test]
fn stream_survives_restart_through_file_store() {
    let temp = tempfile::tempdir().expect("temp dir");
    let storage = StorageConfig::with_root(temp.path().to_path_buf());
    let clock = ManualClock::new(Utc::now());

    let session_id = {
        let store: Arc<dyn DurableStore> = Arc::new(FileStore::new(&storage.state_file()));
        let (mut client, transport, _) = client_over(store, &clock, "alice");
        client.open().expect("open");
        client.send_message("summarize my day").expect("send");
        transport.push_json(json!({"type": "stream_start"}));
        transport.push_json(json!({"type": "stream_chunk", "content": "You have "}));
        transport.push_json(json!({"type": "stream_chunk", "content": "three meetings"}));
        for _ in 0..3 {
            client.poll(std::time::Duration::ZERO).expect("poll");
        }
        client.session_id().to_string()
    };

    clock.advance(Duration::minutes(1));
    let store: Arc<dyn DurableStore> = Arc::new(FileStore::new(&storage.state_file()));
    let (mut client, transport, _) = client_over(store, &clock, "alice");
    client.open().expect("reopen");

    assert_eq!(client.session_id(), session_id);
    assert_eq!(client.stream().phase, StreamPhase::Streaming);
    assert_eq!(client.stream().buffer, "You have three meetings");
    assert!(client
        .drain_notices()
        .contains(&ClientNotice::StreamResumed {
            buffer: "You have three meetings".to_string()
        }));
    assert_eq!(
        transport.sent(),
        vec![OutboundMessage::CheckStatus { session_id }]
    );
}

#[test]
fn record_for_previous_session_is_not_resumed() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    let (client, _, _) = client_over(Arc::clone(&dyn_store), &clock, "alice");
    let current = client.session_id().to_string();
    drop(client);

    // A record filed under the current key but stamped with another session.
    let record = StreamRecord {
        active: true,
        buffer: "stale".to_string(),
        timestamp: clock.now().timestamp_millis(),
        session_id: "session_other".to_string(),
    };
    let key = StoreKey::stream_state("alice", &current);
    save_json(store.as_ref(), &key, &record).expect("seed");

    let (mut client, transport, _) = client_over(dyn_store, &clock, "alice");
    client.open().expect("open");
    assert!(client.stream().is_idle());
    assert!(transport.sent().is_empty());
    assert_eq!(load_json::<StreamRecord>(store.as_ref(), &key).expect("load"), None);
}

#[test]
fn stale_record_from_a_killed_run_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    let (client, _, _) = client_over(Arc::clone(&dyn_store), &clock, "alice");
    let session_id = client.session_id().to_string();
    drop(client);

    seed_stream_record(&store, "alice", &session_id, "old", clock.now()).expect("seed");
    clock.advance(Duration::minutes(5) + Duration::seconds(1));

    let (mut client, _, _) = client_over(dyn_store, &clock, "alice");
    client.open().expect("open");
    assert!(client.stream().is_idle());
    assert!(client.stream().buffer.is_empty());
}

#[test]
fn rollback_then_continue_conversation() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());
    let (mut client, transport, api) = client_over(store, &clock, "alice");
    api.set_history(client.session_id(), conversation(6));
    client.open().expect("open");
    assert_eq!(client.stream().message_count, 6);

    api.set_rollback_response(RollbackResponse {
        success: true,
        rolled_back_messages: 2,
        rolled_back_transactions: 0,
        message: None,
    });
    client.rollback_to(4).expect("rollback");
    assert_eq!(client.stream().message_count, 4);
    assert_eq!(client.transcript().last_index(), Some(3));

    client.send_message("different question").expect("send");
    assert_eq!(client.transcript().last_index(), Some(4));
    transport.push_json(json!({"type": "message", "content": "different answer"}));
    client.poll(std::time::Duration::ZERO).expect("poll");

    assert!(client.stream().is_idle());
    assert_eq!(client.stream().message_count, 6);
    assert_eq!(client.transcript().last_index(), Some(5));
    assert_eq!(client.snapshot().rollback_baseline, 0);
}
