use instruct_engine::cache::CacheKey;
use instruct_engine::engine::flight::InFlight;
use std::time::Duration;

fn key(hex: &str) -> CacheKey {
    CacheKey::from_hex(hex)
}

#[tokio::test]
async fn released_slot_is_removed() {
    let flights = InFlight::new();
    let guard = flights.acquire(&key("aa")).await;
    assert_eq!(flights.len(), 1);
    drop(guard);
    assert!(flights.is_empty());
}

#[tokio::test]
async fn second_caller_waits_for_the_first() {
    let flights = InFlight::new();
    let held = flights.acquire(&key("aa")).await;

    let waited = tokio::time::timeout(Duration::from_millis(20), flights.acquire(&key("aa"))).await;
    assert!(waited.is_err());

    // Other keys are independent.
    drop(flights.acquire(&key("bb")).await);
    drop(held);
    assert!(flights.is_empty());
}

#[tokio::test]
async fn waiter_dropped_after_release_leaves_no_slot_behind() {
    let flights = InFlight::new();
    let held = flights.acquire(&key("aa")).await;

    let waiter_key = key("aa");
    let mut waiter = Box::pin(flights.acquire(&waiter_key));
    tokio::select! {
        biased;
        _ = &mut waiter => panic!("slot should still be held"),
        _ = std::future::ready(()) => {}
    }

    // The waiter is still queued when the holder releases, then gives up
    // before it is polled again.
    drop(held);
    drop(waiter);

    drop(flights.acquire(&key("bb")).await);
    assert!(flights.is_empty());
}
