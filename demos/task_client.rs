//! Task client example
//!
//! 1. Push a task and wait for its result.
//! 2. Push a batch of tasks without waiting.
//!
//! To run this example:
//! 1. Make sure Redis is running on localhost:6379
//! 2. Make sure a worker is running (run the simple_worker example)
//! 3. Run: cargo run --example task_client

use std::time::Duration;

use dsq::manager::{Manager, PushOptions};
use dsq::store::{QueueStore, ResultStore};
use dsq::Value;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let queue = QueueStore::new("redis://127.0.0.1:6379")?;
    let result = ResultStore::new("redis://127.0.0.1:6379")?;
    let manager = std::sync::Arc::new(Manager::new(queue, result));

    let pushed = manager
        .push(PushOptions {
            queue: Some("default".to_string()),
            name: "add".to_string(),
            args: vec![Value::from(10), Value::from(32)],
            keep_result: Some(60),
            ..Default::default()
        })
        .await?;

    match pushed
        .ready(Duration::from_secs(5), Duration::from_millis(100))
        .await
    {
        Some(record) => info!(?record, "got result"),
        None => info!("no result within timeout"),
    }

    for i in 0..10 {
        manager
            .push(PushOptions {
                queue: Some("default".to_string()),
                name: "add".to_string(),
                args: vec![Value::from(i), Value::from(i)],
                ..Default::default()
            })
            .await?;
    }

    Ok(())
}
