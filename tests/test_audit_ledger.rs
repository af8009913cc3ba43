//! Integration tests for the audit trail.
//!
//! Events produced by the types crate are persisted through the ledger's
//! store and async writer, then queried and checked for tampering.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tally::commands::DispatchRequest;
use tally::ledger::{AsyncAuditConfig, AsyncAuditWriter, AuditSink, AuditStore, GENESIS_HASH};
use tally::types::{CommandResult, CommandStatus, RateLimitConfig};

use common::{event, open_test_store, temp_db, Fixture};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn writer_config() -> AsyncAuditConfig {
    AsyncAuditConfig {
        channel_capacity: 1024,
        batch_size: 16,
        flush_interval: Duration::from_millis(20),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_append_and_query_back_fields_match() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let result = CommandResult::ok("Alert set: AAPL above 150");
    let alert = event("alice", "alert", &["AAPL", ">150"], &result)
        .with_message_id(Some("m-1".into()));
    let record = store.append(&alert).expect("should append entry");

    assert_eq!(record.actor_id, "alice");
    assert_eq!(record.scope_id, common::SCOPE);
    assert_eq!(record.command, "alert");
    assert_eq!(record.status, "ok");
    assert_eq!(record.message_id.as_deref(), Some("m-1"));
    assert_eq!(record.prev_hash, GENESIS_HASH);

    let results = store.query_last(1).expect("should query last entry");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry_id, record.entry_id);

    let restored = results[0].to_event().expect("should convert back to event");
    assert_eq!(restored.args, vec!["AAPL", ">150"]);
    assert_eq!(restored.status, CommandStatus::Ok);
}

#[test]
fn test_chain_links_consecutive_entries() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let ok = CommandResult::ok("done");
    let first = store.append(&event("alice", "echo", &["a"], &ok)).expect("should append");
    let second = store.append(&event("alice", "echo", &["b"], &ok)).expect("should append");

    assert_eq!(second.prev_hash, first.entry_hash);
    assert_eq!(store.latest_hash(), second.entry_hash);
}

#[test]
fn test_query_by_actor_filters_and_orders() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let ok = CommandResult::ok("done");
    for actor in ["alice", "bob", "alice", "carol", "alice"] {
        store.append(&event(actor, "help", &[], &ok)).expect("should append");
    }

    let alice = store.query_actor("alice", 10).expect("should query by actor");
    assert_eq!(alice.len(), 3);
    assert!(alice.iter().all(|r| r.actor_id == "alice"));
    assert!(alice.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let limited = store.query_actor("alice", 2).expect("should query by actor");
    assert_eq!(limited.len(), 2);
    assert_eq!(store.count().expect("should count"), 5);
}

#[test]
fn test_tampered_row_is_detected() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let denied = CommandResult::error("Access denied");
    for i in 0..5 {
        let n = i.to_string();
        store
            .append(&event("mallory", "purge", &[n.as_str()], &denied))
            .expect("should append");
    }
    assert!(store.verify_integrity().expect("should verify").valid);

    // Rewrite history through a separate connection.
    let conn = rusqlite::Connection::open(tmp.path()).expect("should open raw connection");
    conn.execute("UPDATE command_audit SET status = 'ok' WHERE id = 3", [])
        .expect("should tamper with row");

    let report = store.verify_integrity().expect("should verify");
    assert!(!report.valid);
    assert_eq!(report.total_entries, 5);
    assert_eq!(report.first_invalid_entry, Some(2));
}

#[test]
fn test_reopen_continues_chain() {
    let tmp = temp_db();
    let ok = CommandResult::ok("done");
    let last_hash = {
        let mut store = open_test_store(&tmp);
        store.append(&event("alice", "help", &[], &ok)).expect("should append");
        store.latest_hash().to_string()
    };

    let mut store = open_test_store(&tmp);
    let next = store.append(&event("bob", "help", &[], &ok)).expect("should append");
    assert_eq!(next.prev_hash, last_hash);
    assert!(store.verify_integrity().expect("should verify").valid);
}

#[tokio::test]
async fn test_async_writer_persists_dispatch_trail() {
    let tmp = temp_db();
    let writer = Arc::new(
        AsyncAuditWriter::start(tmp.path(), writer_config()).expect("should start audit writer"),
    );
    let fx = Fixture::with_sink_and_config(
        Some(writer.clone() as Arc<dyn AuditSink>),
        RateLimitConfig::default(),
    );

    fx.dispatcher
        .execute(DispatchRequest::new("alice", common::SCOPE, "/echo hi").with_message_id("m-9"))
        .await;
    fx.dispatcher
        .execute(DispatchRequest::new("alice", common::SCOPE, "/kick bob"))
        .await;
    // Unknown commands never reach the ledger.
    fx.dispatcher
        .execute(DispatchRequest::new("alice", common::SCOPE, "/nope"))
        .await;

    writer.shutdown().await.expect("should drain audit writer");

    let store = AuditStore::open(tmp.path()).expect("should reopen audit store");
    let records = store.query_last(10).expect("should query");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].command, "kick");
    assert_eq!(records[0].status, "error");
    assert_eq!(records[0].detail.as_deref(), Some("Admin permission required"));
    assert_eq!(records[1].command, "echo");
    assert_eq!(records[1].message_id.as_deref(), Some("m-9"));
    assert!(store.verify_integrity().expect("should verify").valid);
}
