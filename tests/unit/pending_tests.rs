//! Unit tests for the correlation table and its guard.

use std::sync::Arc;

use serde_json::json;

use muxlink::client::pending::PendingTable;
use muxlink::wire::Response;
use muxlink::ClientError;

fn ok_response(id: &str) -> Response {
    Response {
        id: id.into(),
        kind: "response".into(),
        success: true,
        data: json!(id),
        error: None,
    }
}

// ── Delivery ────────────────────────────────────────────────────────────────

/// Delivering a response resolves the slot registered under its id.
#[tokio::test]
async fn deliver_resolves_the_matching_slot() {
    let table = Arc::new(PendingTable::new());
    let (_guard, rx) = table.register("a", "echo");

    assert!(table.deliver("a", Ok(ok_response("a"))));

    let delivered = rx.await.expect("slot resolved").expect("ok delivery");
    assert_eq!(delivered.data, json!("a"));
    assert!(table.is_empty());
}

/// A response for an id nobody registered changes nothing.
#[tokio::test]
async fn deliver_for_unknown_id_is_a_no_op() {
    let table = Arc::new(PendingTable::new());
    let (_guard, _rx) = table.register("a", "echo");

    assert!(!table.deliver("zzz", Ok(ok_response("zzz"))));
    assert_eq!(table.len(), 1);
}

/// The first response wins; a second one for the same id is refused.
#[tokio::test]
async fn second_delivery_for_same_id_is_rejected() {
    let table = Arc::new(PendingTable::new());
    let (_guard, rx) = table.register("a", "echo");

    assert!(table.deliver("a", Ok(ok_response("a"))));
    assert!(!table.deliver("a", Ok(ok_response("a"))));
    assert!(rx.await.is_ok());
}

// ── Guard ───────────────────────────────────────────────────────────────────

/// Dropping the guard removes its entry.
#[test]
fn dropping_the_guard_deregisters() {
    let table = Arc::new(PendingTable::new());
    {
        let (_guard, _rx) = table.register("a", "echo");
        assert_eq!(table.ids(), vec!["a".to_owned()]);
    }
    assert!(table.is_empty());
}

/// `release` is `true` only while the entry is still registered.
#[test]
fn release_reports_whether_it_removed_the_entry() {
    let table = Arc::new(PendingTable::new());

    let (guard, _rx) = table.register("a", "echo");
    assert_eq!(guard.id(), "a");
    assert!(guard.release());

    let (guard, _rx) = table.register("b", "echo");
    assert!(table.take("b").is_some());
    assert!(!guard.release());
    assert!(table.is_empty());
}

// ── Draining ────────────────────────────────────────────────────────────────

/// `fail_all` hands the same error to every waiter and empties the table.
#[tokio::test]
async fn fail_all_resolves_every_slot_with_the_error() {
    let table = Arc::new(PendingTable::new());
    let (_ga, rx_a) = table.register("a", "one");
    let (_gb, rx_b) = table.register("b", "two");

    let err = ClientError::Connection("connection lost".into());
    assert_eq!(table.fail_all(&err), 2);
    assert!(table.is_empty());

    assert_eq!(rx_a.await.expect("resolved"), Err(err.clone()));
    assert_eq!(rx_b.await.expect("resolved"), Err(err));
}

/// Draining an empty table fails nothing.
#[test]
fn fail_all_on_empty_table_returns_zero() {
    let table = PendingTable::new();
    assert_eq!(table.fail_all(&ClientError::NotConnected), 0);
}

/// Delivery to a caller that stopped listening reports `false`.
#[test]
fn delivery_to_a_dropped_receiver_reports_false() {
    let table = Arc::new(PendingTable::new());
    let (_guard, rx) = table.register("a", "echo");
    drop(rx);

    assert!(!table.deliver("a", Ok(ok_response("a"))));
    assert!(table.is_empty());
}

// ── Inspection ──────────────────────────────────────────────────────────────

/// `ids` lists outstanding ids in sorted order.
#[test]
fn ids_are_sorted() {
    let table = Arc::new(PendingTable::new());
    let (_gc, _rc) = table.register("c", "x");
    let (_ga, _ra) = table.register("a", "x");
    let (_gb, _rb) = table.register("b", "x");

    assert_eq!(table.ids(), vec!["a", "b", "c"]);
}

/// A taken entry keeps its kind and time since registration.
#[test]
fn taken_entry_reports_kind_and_age() {
    let table = Arc::new(PendingTable::new());
    let (_guard, _rx) = table.register("a", "echo");

    let entry = table.take("a").expect("entry present");
    assert_eq!(entry.id, "a");
    assert_eq!(entry.kind, "echo");
    assert!(entry.age() <= entry.registered_at.elapsed());
}

/// Registrations and guard drops from many threads leave the table empty.
#[test]
fn concurrent_registration_and_removal_stay_consistent() {
    let table = Arc::new(PendingTable::new());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for i in 0..100 {
                    let id = format!("{t}-{i}");
                    let (guard, _rx) = table.register(&id, "load");
                    if i % 2 == 0 {
                        assert!(table.deliver(&id, Err(ClientError::NotConnected)));
                    }
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }
    assert!(table.is_empty());
}
