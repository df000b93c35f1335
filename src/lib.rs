//! # dsq
//!
//! A distributed task queue over a Redis-compatible store: producers push
//! named task invocations with optional scheduling, retry, dead-letter,
//! result-retention and time-to-live semantics; workers pop tasks in
//! queue-priority order and execute registered handlers.
//!
//! ## Features
//!
//! - Binary (msgpack) task envelopes with a lossless binary/text distinction
//! - Redis-backed ready queues plus a single time-ordered schedule set
//! - Retry with backoff, dead-lettering, and result retention
//! - Per-task timeout enforcement
//! - A crontab/interval dispatcher for in-process wallclock scheduling
//! - A thin HTTP ingress and a forwarder for cross-store handoffs
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dsq::manager::Manager;
//! use dsq::store::{QueueStore, ResultStore};
//!
//! # async fn run() -> dsq::error::DsqResult<()> {
//! let queue = QueueStore::new("redis://127.0.0.1:6379")?;
//! let result = ResultStore::new("redis://127.0.0.1:6379")?;
//! let manager = Arc::new(Manager::new(queue, result));
//!
//! manager
//!     .register("echo", |_ctx, args, _kwargs| async move { Ok(args[0].clone()) })
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crontab;
pub mod error;
pub mod forwarder;
pub mod http;
pub mod manager;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod worker;

pub use codec::Value;
pub use error::{DsqError, DsqResult};
pub use manager::{Context, Manager, PushOptions, PushResult};
pub use scheduler::Scheduler;
pub use store::{QueueStore, ResultRecord, ResultStore};
pub use task::{Retry, TaskEnvelope};
pub use worker::{Worker, WorkerConfig};

/// Version of the dsq library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
