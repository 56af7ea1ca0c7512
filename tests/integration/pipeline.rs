//! Aggregator → store pipeline behaviour observed through the public API.

use chrono::{TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use poolscan::engine::{Aggregator, CancelToken, Store};
use poolscan::sources::synthetic::SyntheticSource;
use poolscan::sources::Source;
use poolscan::types::{Event, ScanError, SourceError};

use crate::scripted_source::{pool, Ending, ScriptedSource};

const RUN_TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_run(aggregator: Aggregator, cancel: &CancelToken) -> JoinHandle<Result<(), ScanError>> {
    let cancel = cancel.clone();
    tokio::spawn(async move { aggregator.run(&cancel).await })
}

async fn wait_for_len(store: &Store, len: usize) {
    for _ in 0..400 {
        if store.len() >= len {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("store never reached {len} events (has {})", store.len());
}

async fn finish(run: JoinHandle<Result<(), ScanError>>) -> Result<(), ScanError> {
    tokio::time::timeout(RUN_TIMEOUT, run)
        .await
        .expect("run should end")
        .expect("run task panicked")
}

#[tokio::test]
async fn test_new_pool_is_stamped_and_listed() {
    let store = Store::new();
    let source = ScriptedSource::new("raydium-watch", vec![pool("P1")], Ending::WaitForCancel);
    let aggregator = Aggregator::new(store.clone(), vec![source.into_arc()]);
    let cancel = CancelToken::new();

    let before = Utc::now();
    let run = spawn_run(aggregator, &cancel);
    wait_for_len(&store, 1).await;
    cancel.cancel();
    assert!(finish(run).await.is_ok());

    let listed = store.list(1);
    assert_eq!(listed.len(), 1);
    let event = &listed[0];
    assert_eq!(
        (
            event.chain.as_str(),
            event.dex.as_str(),
            event.pool_address.as_str(),
            event.base_mint.as_str(),
            event.quote_mint.as_str()
        ),
        ("solana", "raydium", "P1", "B", "Q")
    );
    let seen_at = event.seen_at.expect("aggregator stamps missing timestamps");
    assert!(seen_at >= before);
    assert!(seen_at <= Utc::now());
}

#[tokio::test]
async fn test_source_timestamp_is_kept() {
    let store = Store::new();
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let source = ScriptedSource::new("stamped", vec![pool("P1").with_seen_at(at)], Ending::Finish);
    let aggregator = Aggregator::new(store.clone(), vec![source.into_arc()]);

    let result = tokio::time::timeout(RUN_TIMEOUT, aggregator.run(&CancelToken::new()))
        .await
        .expect("finishing source ends the run");
    assert!(result.is_ok());
    assert_eq!(store.list(0)[0].seen_at, Some(at));
}

#[tokio::test]
async fn test_duplicates_across_sources_are_stored_and_published_once() {
    let store = Store::new();
    let (mut subscription, _unsubscribe) = store.subscribe();

    let a = ScriptedSource::new("a", vec![pool("SAME"), pool("A1")], Ending::Finish);
    let b = ScriptedSource::new("b", vec![pool("SAME"), pool("B1")], Ending::Finish);
    // Same address on another DEX is a different pool.
    let c = ScriptedSource::new(
        "c",
        vec![Event::new("solana", "orca", "SAME", "B", "Q")],
        Ending::Finish,
    );
    let aggregator = Aggregator::new(store.clone(), vec![a.into_arc(), b.into_arc(), c.into_arc()])
        .with_discovery_log(false);

    let result = tokio::time::timeout(RUN_TIMEOUT, aggregator.run(&CancelToken::new()))
        .await
        .expect("finishing sources end the run");
    assert!(result.is_ok());
    assert_eq!(store.len(), 4);

    let mut delivered = Vec::new();
    while let Some(event) = subscription.try_recv() {
        delivered.push(event.key());
    }
    assert_eq!(delivered.len(), 4);
    let listed: Vec<_> = store.list(0).iter().rev().map(Event::key).collect();
    assert_eq!(delivered, listed, "live order matches commit order");
}

#[tokio::test]
async fn test_list_is_newest_first_and_clamped() {
    let store = Store::new();
    let source = ScriptedSource::new(
        "ordered",
        vec![pool("P1"), pool("P2"), pool("P3")],
        Ending::Finish,
    );
    let aggregator = Aggregator::new(store.clone(), vec![source.into_arc()]);
    assert!(aggregator.run(&CancelToken::new()).await.is_ok());

    let pools = |limit| -> Vec<String> {
        store.list(limit).into_iter().map(|e| e.pool_address).collect()
    };
    assert_eq!(pools(2), vec!["P3", "P2"]);
    assert_eq!(pools(0), vec!["P3", "P2", "P1"]);
    assert_eq!(pools(10), vec!["P3", "P2", "P1"]);
}

#[tokio::test]
async fn test_late_subscriber_sees_only_later_events() {
    let store = Store::new();
    store.add(pool("EARLY").with_seen_at(Utc::now()));

    let (mut subscription, _unsubscribe) = store.subscribe();
    let source = ScriptedSource::new("late", vec![pool("EARLY"), pool("LATE")], Ending::Finish);
    let aggregator = Aggregator::new(store.clone(), vec![source.into_arc()]);
    assert!(aggregator.run(&CancelToken::new()).await.is_ok());

    let first = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("live event delivered")
        .expect("subscription open");
    assert_eq!(first.pool_address, "LATE");
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn test_unsubscribed_receiver_gets_nothing_further() {
    let store = Store::new();
    let (mut subscription, unsubscribe) = store.subscribe();
    let (_other, _keep) = store.subscribe();
    assert_eq!(store.subscriber_count(), 2);

    unsubscribe.unsubscribe();
    unsubscribe.unsubscribe();
    assert_eq!(store.subscriber_count(), 1);

    let source = ScriptedSource::new("after-unsub", vec![pool("P1")], Ending::Finish);
    let aggregator = Aggregator::new(store.clone(), vec![source.into_arc()]);
    assert!(aggregator.run(&CancelToken::new()).await.is_ok());

    assert_eq!(store.len(), 1);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn test_cancellation_is_not_a_failure() {
    let store = Store::new();
    let first = ScriptedSource::new("first", vec![pool("P1")], Ending::WaitForCancel);
    let second = ScriptedSource::idle("second");
    let flags = [first.cancel_flag(), second.cancel_flag()];
    let aggregator = Aggregator::new(store.clone(), vec![first.into_arc(), second.into_arc()]);
    let cancel = CancelToken::new();

    let run = spawn_run(aggregator, &cancel);
    wait_for_len(&store, 1).await;
    cancel.cancel();

    assert!(finish(run).await.is_ok());
    for flag in &flags {
        assert!(flag.load(Ordering::SeqCst), "every source observes cancellation");
    }
}

#[tokio::test]
async fn test_single_failure_propagates_and_stops_siblings() {
    let store = Store::new();
    let healthy = ScriptedSource::new("healthy", vec![pool("P1")], Ending::WaitForCancel);
    let stopped = healthy.cancel_flag();
    let broken = ScriptedSource::new("broken", Vec::new(), Ending::Fail("rpc unreachable".into()));
    let aggregator = Aggregator::new(store.clone(), vec![healthy.into_arc(), broken.into_arc()]);
    let cancel = CancelToken::new();

    let result = finish(spawn_run(aggregator, &cancel)).await;
    match result {
        Err(ScanError::Source {
            source_name,
            error: SourceError::Failed(message),
        }) => {
            assert_eq!(source_name, "broken");
            assert_eq!(message, "rpc unreachable");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(stopped.load(Ordering::SeqCst), "sibling told to stop");
    assert!(!cancel.is_cancelled(), "caller's token is left alone");
}

#[tokio::test]
async fn test_synthetic_feed_runs_to_its_limit() {
    let store = Store::new();
    let synthetic: Arc<dyn Source> = Arc::new(
        SyntheticSource::new("solana", "raydium", Duration::from_millis(1))
            .with_repeat_every(2)
            .with_limit(Some(6)),
    );
    let aggregator = Aggregator::new(store.clone(), vec![synthetic]).with_discovery_log(false);

    let result = tokio::time::timeout(RUN_TIMEOUT, aggregator.run(&CancelToken::new()))
        .await
        .expect("limited feed ends the run");
    assert!(result.is_ok());

    // Every second emission repeats the one before it.
    assert_eq!(store.len(), 3);
    assert!(store
        .list(0)
        .iter()
        .all(|e| e.chain == "solana" && e.dex == "raydium" && e.seen_at.is_some()));
}
