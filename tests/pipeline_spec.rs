//! Integration tests exercising the engine end to end through its public
//! `Pipeline` API with a `ManualClock`, covering the republish lifecycle and
//! its invariants for deferred publication of private records.

use std::sync::Arc;

use deferred_publish::clock::ManualClock;
use deferred_publish::store::MemoryIndexStore;
use deferred_publish::Pipeline;
use serde_json::{json, Value};

fn pipeline_at(start_millis: i64) -> (Pipeline<MemoryIndexStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_millis));
    (Pipeline::new(MemoryIndexStore::new(), clock.clone()), clock)
}

fn private_until(until: &str) -> Value {
    json!({"publishing": {"private": true, "until": until}})
}

#[test]
fn non_private_record_passes_through_unchanged() {
    let (mut p, _clock) = pipeline_at(0);
    let v = json!({"publishing": {"private": false}});
    let out = p.ingest("A", Some(v.clone())).unwrap();
    assert_eq!(out, Some(v.clone()));
    assert_eq!(p.lookup("A").unwrap(), Some(v));
}

#[test]
fn private_record_tombstones_output_but_keeps_lookup_value() {
    let (mut p, _clock) = pipeline_at(0);
    let v = json!({"publishing": {"private": true}});
    let out = p.ingest("A", Some(v.clone())).unwrap();
    assert_eq!(out, None);
    assert_eq!(p.lookup("A").unwrap(), Some(v));
}

#[test]
fn private_record_with_future_until_registers_a_deadline() {
    let (mut p, _clock) = pipeline_at(0);
    let v = private_until("2030-01-01T00:00:00Z");
    let out = p.ingest("A", Some(v.clone())).unwrap();
    assert_eq!(out, None);
    assert_eq!(p.lookup("A").unwrap(), Some(v));
}

#[test]
fn shared_deadline_republishes_both_keys_in_registration_order() {
    let (mut p, clock) = pipeline_at(0);
    let v1 = private_until("1970-01-01T00:00:10Z");
    let v2 = private_until("1970-01-01T00:00:10Z");

    let out_a = p.ingest("A", Some(v1)).unwrap();
    let out_b = p.ingest("B", Some(v2)).unwrap();
    assert_eq!(out_a, None);
    assert_eq!(out_b, None);

    clock.advance_to(10_000);
    let republished = p.scan_now().unwrap();
    assert_eq!(republished.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
}

#[test]
fn scan_republishes_due_keys_ascending_by_deadline_regardless_of_registration_order() {
    let (mut p, clock) = pipeline_at(0);

    let v6 = private_until("1970-01-01T00:00:06Z");
    let v10 = private_until("1970-01-01T00:00:10Z");
    let v5 = private_until("1970-01-01T00:00:05Z");

    assert_eq!(p.ingest("6", Some(v6.clone())).unwrap(), None);
    assert_eq!(p.ingest("10", Some(v10)).unwrap(), None);
    assert_eq!(p.ingest("5", Some(v5.clone())).unwrap(), None);

    clock.advance_to(8_000);
    let republished = p.scan_now().unwrap();

    // Ascending by deadline, then append order within a bucket: "5" (T=5s)
    // before "6" (T=6s); "10" (T=10s) is not yet due.
    assert_eq!(
        republished,
        vec![("5".to_string(), Some(v5)), ("6".to_string(), Some(v6))]
    );
}

#[test]
fn new_deadline_registered_after_prior_one_elapses_and_republishes() {
    let (mut p, clock) = pipeline_at(0);

    // T1 elapses during the 500ms interval before T2 is registered.
    let v1 = private_until("1970-01-01T00:00:00.200Z");
    assert_eq!(p.ingest("A", Some(v1.clone())).unwrap(), None);

    clock.advance_to(500);
    let republished = p.scan_now().unwrap();
    assert_eq!(republished, vec![("A".to_string(), Some(v1.clone()))]);

    let v2 = private_until("1970-01-01T00:00:02Z");
    let out3 = p.ingest("A", Some(v2.clone())).unwrap();
    assert_eq!(out3, None);
    assert_eq!(p.lookup("A").unwrap(), Some(v2));
}

#[test]
fn superseding_deadline_before_it_elapses_prevents_the_old_one_from_republishing() {
    let (mut p, clock) = pipeline_at(0);

    let v1 = private_until("1970-01-01T00:00:01Z");
    let v2 = private_until("1970-01-01T00:00:05Z");

    assert_eq!(p.ingest("A", Some(v1)).unwrap(), None);
    assert_eq!(p.ingest("A", Some(v2.clone())).unwrap(), None);

    // Past T1 but not T2.
    clock.advance_to(2_000);
    let republished = p.scan_now().unwrap();
    assert!(republished.is_empty(), "v1 must not republish once superseded");
    assert_eq!(p.lookup("A").unwrap(), Some(v2));
}

#[test]
fn non_private_update_cancels_pending_deadline() {
    let (mut p, _clock) = pipeline_at(0);
    let v1 = private_until("2030-01-01T00:00:00Z");
    let v2 = json!({"publishing": {"private": false}});

    assert_eq!(p.ingest("A", Some(v1)).unwrap(), None);
    let out2 = p.ingest("A", Some(v2.clone())).unwrap();

    assert_eq!(out2, Some(v2.clone()));
    assert_eq!(p.lookup("A").unwrap(), Some(v2));
}

#[test]
fn cancelling_one_of_two_keys_sharing_a_deadline_leaves_the_other_registered() {
    let (mut p, clock) = pipeline_at(0);
    let v = private_until("1970-01-01T00:00:05Z");

    p.ingest("A", Some(v.clone())).unwrap();
    p.ingest("B", Some(v.clone())).unwrap();
    p.ingest("A", Some(json!({"publishing": {"private": false}})))
        .unwrap();

    // Only B still has a registered deadline, so only B republishes.
    clock.advance_to(5_000);
    let republished = p.scan_now().unwrap();
    assert_eq!(republished, vec![("B".to_string(), Some(v))]);
}

#[test]
fn update_with_an_already_past_until_cancels_rather_than_registers() {
    let (mut p, _clock) = pipeline_at(1_000);
    let future = private_until("2030-01-01T00:00:00Z");
    let past = private_until("1970-01-01T00:00:00Z");

    p.ingest("A", Some(future)).unwrap();
    p.ingest("A", Some(past.clone())).unwrap();

    assert_eq!(p.lookup("A").unwrap(), Some(past));
    // No deadline remains, so advancing far past either instant republishes nothing.
}

#[test]
fn second_scan_after_republish_does_not_republish_again() {
    let (mut p, clock) = pipeline_at(0);
    let v = private_until("1970-01-01T00:00:01Z");
    p.ingest("A", Some(v.clone())).unwrap();

    clock.advance_to(2_000);
    let first = p.scan_now().unwrap();
    assert_eq!(first, vec![("A".to_string(), Some(v))]);

    let second = p.scan_now().unwrap();
    assert!(second.is_empty(), "second scan must not re-republish");
}

#[test]
fn null_input_is_treated_as_a_tombstone() {
    let (mut p, _clock) = pipeline_at(0);
    let v = private_until("2030-01-01T00:00:00Z");
    p.ingest("A", Some(v)).unwrap();

    let out = p.ingest("A", None).unwrap();
    assert_eq!(out, None);
    assert_eq!(p.lookup("A").unwrap(), None);
}
