//! Scheduled tasks example
//!
//! 1. Push a task with a `delay`, landing it in the schedule set.
//! 2. Run a scheduler pass that promotes it once its eta elapses.
//! 3. Use a `Crontab` to decide what's due at a given wallclock timestamp.
//!
//! To run this example:
//! 1. Make sure Redis is running on localhost:6379
//! 2. Run: cargo run --example scheduled_tasks

use std::sync::Arc;

use dsq::crontab::{Crontab, Field};
use dsq::manager::{Manager, PushOptions};
use dsq::scheduler::Scheduler;
use dsq::store::{QueueStore, ResultStore};
use dsq::Value;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let queue = QueueStore::new("redis://127.0.0.1:6379")?;
    let result = ResultStore::new("redis://127.0.0.1:6379")?;
    let manager = Arc::new(Manager::new(queue.clone(), result));

    manager
        .register("log_message", |_ctx, args, _kwargs| async move {
            info!(message = ?args.first(), "scheduled task fired");
            Ok(Value::Nil)
        })
        .await;

    manager
        .push(PushOptions {
            queue: Some("default".to_string()),
            name: "log_message".to_string(),
            args: vec![Value::from("delayed hello")],
            delay: Some(5),
            ..Default::default()
        })
        .await?;

    Scheduler::new(queue).run(true).await?;

    // A crontab entry firing every 15 minutes, any hour/day/month/weekday.
    let mut crontab: Crontab<&'static str> = Crontab::new();
    crontab.add(
        "quarter_hourly_report",
        Field::Set(vec![0, 15, 30, 45]),
        Field::default(),
        Field::default(),
        Field::default(),
        Field::default(),
    );
    let due = crontab.actions(30, 9, 1, 1, 1);
    info!(?due, "crontab actions due at 09:30 on the 1st");

    Ok(())
}
