//! End-to-end behavior against a live Redis, mirroring the original
//! store's test suite (expiry, unknown-routing, retry, dead-letter,
//! sync mode, result retention). Requires a Redis instance at
//! `redis://127.0.0.1:6379` and is gated behind the `redis-integration`
//! feature so `cargo test` stays hermetic by default.

#![cfg(feature = "redis-integration")]

use std::sync::Arc;
use std::time::Duration;

use dsq::manager::{Manager, PushOptions};
use dsq::store::{QueueStore, ResultRecord, ResultStore};
use dsq::task::Retry;
use dsq::{DsqError, Value};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn fresh_manager() -> Arc<Manager> {
    let client = redis::Client::open(REDIS_URL).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    let queue = QueueStore::new(REDIS_URL).unwrap();
    let result = ResultStore::new(REDIS_URL).unwrap();
    Arc::new(Manager::new(queue, result))
}

fn task(name: &str) -> dsq::TaskEnvelope {
    dsq::TaskEnvelope {
        id: "t".to_string(),
        name: name.to_string(),
        queue: Some("test".to_string()),
        args: Vec::new(),
        kwargs: Default::default(),
        meta: None,
        expire: None,
        dead: None,
        retry: None,
        retry_delay: None,
        timeout: None,
        keep_result: None,
    }
}

#[tokio::test]
async fn expired_task_is_dropped() {
    let manager = fresh_manager().await;
    manager
        .register("foo", |_ctx, _args, _kwargs| async move { Ok(Value::Nil) })
        .await;

    let mut t = task("foo");
    t.expire = Some(10.0);
    let result = manager.process(t.clone(), Some(15.0), true).await.unwrap();
    assert!(result.is_none());

    let result = manager.process(t, Some(5.0), true).await.unwrap();
    assert!(result.is_some());
}

#[tokio::test]
async fn unknown_task_is_routed_to_unknown_queue() {
    let manager = fresh_manager().await;
    manager.process(task("foo"), None, true).await.unwrap();

    let popped = manager
        .pop(&["unknown".to_string()], 1)
        .await
        .unwrap()
        .expect("task routed to unknown queue");
    assert_eq!(popped.name, "foo");
}

#[tokio::test]
async fn retry_decrements_and_requeues_with_delay() {
    let manager = fresh_manager().await;
    manager
        .register("foo", |_ctx, _args, _kwargs| async move {
            Err(DsqError::task_failed("Boom", "boom", ""))
        })
        .await;

    let mut t = task("foo");
    t.retry = Some(Retry::Count(1));
    t.retry_delay = Some(10);

    manager.process(t, Some(20.0), true).await.unwrap();
    assert!(manager
        .pop(&["test".to_string()], 1)
        .await
        .unwrap()
        .is_none());

    manager.queue_store().reschedule(Some(50.0)).await.unwrap();
    let popped = manager
        .pop(&["test".to_string()], 1)
        .await
        .unwrap()
        .expect("retried task promoted after reschedule");
    assert_eq!(popped.retry, Some(Retry::Count(0)));
}

#[tokio::test]
async fn infinite_retry_is_requeued_and_stays_infinite() {
    let manager = fresh_manager().await;
    manager
        .register("foo", |_ctx, _args, _kwargs| async move {
            Err(DsqError::task_failed("Boom", "boom", ""))
        })
        .await;

    let mut t = task("foo");
    t.retry = Some(Retry::INFINITE);
    t.retry_delay = Some(10);

    manager.process(t, Some(20.0), true).await.unwrap();
    assert!(manager
        .pop(&["test".to_string()], 1)
        .await
        .unwrap()
        .is_none());

    manager.queue_store().reschedule(Some(50.0)).await.unwrap();
    let popped = manager
        .pop(&["test".to_string()], 1)
        .await
        .unwrap()
        .expect("infinite-retry task promoted after reschedule");
    assert_eq!(popped.retry, Some(Retry::INFINITE));
}

#[tokio::test]
async fn exhausted_retry_falls_through_to_dead_letter() {
    let manager = fresh_manager().await;
    manager
        .register("foo", |_ctx, _args, _kwargs| async move {
            Err(DsqError::task_failed("Boom", "boom", ""))
        })
        .await;

    let mut t = task("foo");
    t.retry = Some(Retry::Count(0));
    t.dead = Some("dead".to_string());

    manager.process(t, None, true).await.unwrap();
    let popped = manager
        .pop(&["dead".to_string()], 1)
        .await
        .unwrap()
        .expect("exhausted task routed to dead queue");
    assert_eq!(popped.name, "foo");
    assert!(popped.retry.is_none());
}

#[tokio::test]
async fn sync_mode_propagates_handler_errors() {
    let manager = Arc::new(
        Manager::new(
            QueueStore::new(REDIS_URL).unwrap(),
            ResultStore::new(REDIS_URL).unwrap(),
        )
        .with_sync(true),
    );
    manager
        .register("bad", |_ctx, _args, _kwargs| async move {
            Err(DsqError::task_failed("ZeroDivisionError", "division by zero", ""))
        })
        .await;

    let err = manager
        .push(PushOptions {
            name: "bad".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DsqError::TaskFailed { .. }));
}

#[tokio::test]
async fn result_is_retained_until_polled() {
    let manager = fresh_manager().await;
    manager
        .register("task", |_ctx, _args, _kwargs| async move {
            Ok(Value::from("result"))
        })
        .await;

    let pushed = manager
        .push(PushOptions {
            queue: Some("normal".to_string()),
            name: "task".to_string(),
            keep_result: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(pushed
        .ready(Duration::from_millis(50), Duration::from_millis(10))
        .await
        .is_none());

    let popped = manager
        .pop(&["normal".to_string()], 1)
        .await
        .unwrap()
        .unwrap();
    manager.process(popped, None, true).await.unwrap();

    let record = pushed
        .ready(Duration::from_secs(1), Duration::from_millis(10))
        .await
        .expect("result recorded");
    match record {
        ResultRecord::Success { value } => assert_eq!(value.as_str(), Some("result")),
        ResultRecord::Error { .. } => panic!("expected success"),
    }
}
