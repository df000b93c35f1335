//! The `dsq` command-line driver: thin wiring over [`dsq::manager::Manager`],
//! [`dsq::worker::Worker`], [`dsq::scheduler::Scheduler`] and
//! [`dsq::forwarder::Forwarder`]. Adds no queueing semantics of its own.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use dsq::config::Config;
use dsq::forwarder::Forwarder;
use dsq::manager::Manager;
use dsq::scheduler::Scheduler;
use dsq::store::{QueueStore, ResultStore};
use dsq::worker::{Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "dsq", version, about = "Redis-backed distributed task queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pop tasks from QUEUE (first has priority) and execute handlers.
    Worker {
        /// Module path of the tasks registry; informational for this
        /// crate, which expects handlers to already be registered by the
        /// embedding binary.
        #[arg(short, long)]
        tasks: Option<String>,
        #[arg(long)]
        lifetime: Option<u64>,
        #[arg(long)]
        task_timeout: Option<u64>,
        /// Exit once the given queues are drained instead of blocking forever.
        #[arg(short, long)]
        burst: bool,
        queue: Vec<String>,
    },
    /// Promote delayed tasks into their ready queues as their eta elapses.
    Scheduler {
        #[arg(short, long)]
        burst: bool,
    },
    /// Drain one store into another.
    Forwarder {
        #[arg(short, long)]
        source: Option<String>,
        #[arg(short, long, default_value_t = 1.0)]
        interval: f64,
        #[arg(short = 'b', long = "batch-size", default_value_t = 5000)]
        batch_size: isize,
        dest: String,
    },
    /// Serve the HTTP ingress.
    Http {
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Print a page of a ready queue.
    Queue { queue: Vec<String> },
    /// Print a page of the schedule set.
    Schedule,
    /// List ready-queue names.
    QueueList,
    /// Print queue/schedule cardinalities.
    Stat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let queue = QueueStore::new(&config.redis_url)?;
    let result = ResultStore::new(config.result_redis_url())?;

    match cli.command {
        Command::Worker {
            tasks,
            lifetime,
            task_timeout,
            burst,
            queue: queues,
        } => {
            if let Some(tasks) = tasks {
                info!(tasks, "tasks module is the embedding binary's responsibility");
            }
            let manager = Arc::new(
                Manager::new(queue, result)
                    .with_unknown_queue(config.unknown_queue)
                    .with_default_queue(config.default_queue)
                    .with_default_retry_delay(Some(config.default_retry_delay)),
            );
            let worker = Worker::new(
                manager,
                WorkerConfig {
                    lifetime,
                    task_timeout,
                },
            );
            worker.run(&queues, burst).await?;
        }
        Command::Scheduler { burst } => {
            Scheduler::new(queue).run(burst).await?;
        }
        Command::Forwarder {
            source,
            interval,
            batch_size,
            dest,
        } => {
            let source_store = match source {
                Some(url) => QueueStore::new(&url)?,
                None => queue,
            };
            let dest_store = QueueStore::new(&dest)?;
            let forwarder = Forwarder::new(
                source_store,
                dest_store,
                Duration::from_secs_f64(interval),
                batch_size,
            );
            forwarder.run(|| false).await?;
        }
        Command::Http { bind } => {
            let manager = Arc::new(
                Manager::new(queue, result)
                    .with_unknown_queue(config.unknown_queue)
                    .with_default_queue(config.default_queue)
                    .with_default_retry_delay(Some(config.default_retry_delay)),
            );
            let addr = bind.unwrap_or(config.http_addr);
            info!(%addr, "serving HTTP ingress");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, dsq::http::router(manager)).await?;
        }
        Command::Queue { queue: queues } => {
            for name in if queues.is_empty() {
                queue.queue_list().await?
            } else {
                queues
            } {
                let items = queue.get_queue(&name, 0, 100).await?;
                println!("{name}: {} shown", items.len());
                for item in items {
                    println!("  {}", item.format());
                }
            }
        }
        Command::Schedule => {
            for (eta, queue_name, task) in queue.get_schedule(0, 100).await? {
                println!("{eta} {queue_name} {}", task.format());
            }
        }
        Command::QueueList => {
            for name in queue.queue_list().await? {
                println!("{name}");
            }
        }
        Command::Stat => {
            for (name, count) in queue.stat().await? {
                println!("{name}: {count}");
            }
        }
    }

    Ok(())
}
