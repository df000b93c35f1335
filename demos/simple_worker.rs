//! Simple worker example
//!
//! 1. Register a handler.
//! 2. Push a few tasks.
//! 3. Run a worker in burst mode so it exits once the queues drain.
//!
//! To run this example:
//! 1. Make sure Redis is running on localhost:6379
//! 2. Run: cargo run --example simple_worker

use std::sync::Arc;

use dsq::manager::{Manager, PushOptions};
use dsq::store::{QueueStore, ResultStore};
use dsq::worker::{Worker, WorkerConfig};
use dsq::Value;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let queue = QueueStore::new("redis://127.0.0.1:6379")?;
    let result = ResultStore::new("redis://127.0.0.1:6379")?;
    let manager = Arc::new(Manager::new(queue, result));

    manager
        .register("add", |_ctx, args, _kwargs| async move {
            let a = args[0].as_i64().unwrap_or(0);
            let b = args[1].as_i64().unwrap_or(0);
            info!(a, b, sum = a + b, "adding");
            Ok(Value::from(a + b))
        })
        .await;

    for (a, b) in [(1, 2), (3, 4), (5, 6)] {
        manager
            .push(PushOptions {
                queue: Some("default".to_string()),
                name: "add".to_string(),
                args: vec![Value::from(a), Value::from(b)],
                keep_result: Some(60),
                ..Default::default()
            })
            .await?;
    }

    let worker = Worker::new(manager, WorkerConfig::default());
    worker.run(&["default".to_string()], true).await?;

    Ok(())
}
