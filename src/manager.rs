//! The `Manager`: handler registry, push/pop/process execution contract.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::codec::Value;
use crate::error::{DsqError, DsqResult};
use crate::store::{QueueStore, ResultRecord, ResultStore};
use crate::task::{make_id, Retry, TaskEnvelope};

/// Arbitrary state handed to a stateful handler the first time it runs,
/// then cached for the lifetime of the process.
pub type SharedState = Arc<dyn Any + Send + Sync>;

type HandlerFn =
    Arc<dyn Fn(Context, Vec<Value>, HashMap<String, Value>) -> BoxFuture<'static, DsqResult<Value>> + Send + Sync>;

/// A registered handler, with or without a `Context` argument.
///
/// `WithContext` additionally carries the state seed installed the first
/// time the handler runs; `None` here means the handler wants a context but
/// no persistent state.
#[derive(Clone)]
pub enum HandlerEntry {
    Plain(HandlerFn),
    WithContext(HandlerFn, Option<SharedState>),
}

/// Passed to every handler invocation. Plain handlers never see it; a
/// `with_context` handler uses it to reach the manager (e.g. to push child
/// tasks), the originating envelope, and any cached state.
#[derive(Clone)]
pub struct Context {
    pub manager: Arc<Manager>,
    pub task: TaskEnvelope,
    pub state: Option<SharedState>,
}

impl Context {
    /// Record a result for the current task outside the normal
    /// success-return path, for handlers that manage their own result
    /// lifecycle (e.g. streaming partial progress).
    pub async fn set_result(&self, value: Value, ttl_secs: u64) -> DsqResult<()> {
        self.manager
            .result
            .set(&self.task.id, &ResultRecord::Success { value }, ttl_secs)
            .await
    }
}

/// Arguments to [`Manager::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub queue: Option<String>,
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
    pub meta: Option<HashMap<String, Value>>,
    pub ttl: Option<u64>,
    pub eta: Option<f64>,
    pub delay: Option<u64>,
    pub dead: Option<String>,
    pub retry: Option<Retry>,
    pub retry_delay: Option<u64>,
    pub timeout: Option<u64>,
    pub keep_result: Option<u64>,
}

/// Push defaults bound to a [`TaskHandle`], merged over a per-call
/// `args`/`kwargs` when the handle is invoked.
#[derive(Debug, Clone, Default)]
pub struct TaskDefaults {
    pub queue: Option<String>,
    pub meta: Option<HashMap<String, Value>>,
    pub ttl: Option<u64>,
    pub eta: Option<f64>,
    pub delay: Option<u64>,
    pub dead: Option<String>,
    pub retry: Option<Retry>,
    pub retry_delay: Option<u64>,
    pub timeout: Option<u64>,
    pub keep_result: Option<u64>,
}

/// A named, registered handler bound to its push defaults — the `@manager.task`
/// binding. [`Self::call`] enqueues (honoring `Manager::sync`, same as
/// [`Manager::push`]); [`Self::call_sync`] invokes the handler directly,
/// bypassing the queue entirely regardless of `Manager::sync`.
#[derive(Clone)]
pub struct TaskHandle {
    manager: Arc<Manager>,
    name: String,
    defaults: TaskDefaults,
}

impl TaskHandle {
    /// A new handle for the same task with `overrides` layered on top of
    /// this handle's defaults (each `Some` field in `overrides` wins).
    pub fn run_with(&self, overrides: TaskDefaults) -> TaskHandle {
        let base = &self.defaults;
        TaskHandle {
            manager: self.manager.clone(),
            name: self.name.clone(),
            defaults: TaskDefaults {
                queue: overrides.queue.or_else(|| base.queue.clone()),
                meta: overrides.meta.or_else(|| base.meta.clone()),
                ttl: overrides.ttl.or(base.ttl),
                eta: overrides.eta.or(base.eta),
                delay: overrides.delay.or(base.delay),
                dead: overrides.dead.or_else(|| base.dead.clone()),
                retry: overrides.retry.or_else(|| base.retry.clone()),
                retry_delay: overrides.retry_delay.or(base.retry_delay),
                timeout: overrides.timeout.or(base.timeout),
                keep_result: overrides.keep_result.or(base.keep_result),
            },
        }
    }

    /// Enqueue a call to this task, applying the bound defaults. Honors
    /// `Manager::sync`, same as a direct [`Manager::push`].
    pub async fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> DsqResult<PushResult> {
        let d = self.defaults.clone();
        self.manager
            .push(PushOptions {
                queue: d.queue,
                name: self.name.clone(),
                args,
                kwargs,
                meta: d.meta,
                ttl: d.ttl,
                eta: d.eta,
                delay: d.delay,
                dead: d.dead,
                retry: d.retry,
                retry_delay: d.retry_delay,
                timeout: d.timeout,
                keep_result: d.keep_result,
            })
            .await
    }

    /// Call the handler directly, bypassing the queue and push defaults
    /// entirely — the `.sync()` escape hatch for calling a task like a
    /// plain function.
    pub async fn call_sync(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> DsqResult<Value> {
        self.manager.invoke(&self.name, args, kwargs).await
    }
}

/// Handle returned by [`Manager::push`]. In sync mode the task has already
/// run and the outcome is embedded directly; otherwise [`Self::ready`]
/// polls the result store.
pub struct PushResult {
    manager: Arc<Manager>,
    pub id: String,
    value: Option<Value>,
    error: Option<String>,
    error_message: Option<String>,
    error_trace: Option<String>,
    resolved: bool,
}

impl PushResult {
    fn pending(manager: Arc<Manager>, id: String) -> Self {
        Self {
            manager,
            id,
            value: None,
            error: None,
            error_message: None,
            error_trace: None,
            resolved: false,
        }
    }

    fn resolved_now(manager: Arc<Manager>, id: String, value: Option<Value>) -> Self {
        Self {
            manager,
            id,
            value,
            error: None,
            error_message: None,
            error_trace: None,
            resolved: true,
        }
    }

    /// Poll the result store until a record appears or `timeout` elapses
    /// (checked every `interval`). In sync mode, resolves immediately
    /// without touching the result store.
    pub async fn ready(
        &self,
        timeout: std::time::Duration,
        interval: std::time::Duration,
    ) -> Option<ResultRecord> {
        if self.resolved {
            return match (&self.value, &self.error) {
                (Some(v), _) => Some(ResultRecord::Success { value: v.clone() }),
                (None, Some(e)) => Some(ResultRecord::Error {
                    error: e.clone(),
                    message: self.error_message.clone().unwrap_or_default(),
                    trace: self.error_trace.clone().unwrap_or_default(),
                }),
                (None, None) => None,
            };
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(Some(record)) = self.manager.result.get(&self.id).await {
                return Some(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Ties the queue store, result store and handler registry together, and
/// implements the push/pop/process execution contract.
pub struct Manager {
    queue: QueueStore,
    result: ResultStore,
    handlers: RwLock<HashMap<String, HandlerEntry>>,
    state: RwLock<HashMap<String, SharedState>>,
    /// When true, `push` executes the task inline instead of enqueuing it.
    pub sync: bool,
    unknown_queue: String,
    default_queue: String,
    default_retry_delay: Option<u64>,
}

impl Manager {
    pub fn new(queue: QueueStore, result: ResultStore) -> Self {
        Self {
            queue,
            result,
            handlers: RwLock::new(HashMap::new()),
            state: RwLock::new(HashMap::new()),
            sync: false,
            unknown_queue: "unknown".to_string(),
            default_queue: "dsq".to_string(),
            default_retry_delay: Some(60),
        }
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_unknown_queue(mut self, name: impl Into<String>) -> Self {
        self.unknown_queue = name.into();
        self
    }

    pub fn with_default_queue(mut self, name: impl Into<String>) -> Self {
        self.default_queue = name.into();
        self
    }

    pub fn with_default_retry_delay(mut self, delay: Option<u64>) -> Self {
        self.default_retry_delay = delay;
        self
    }

    pub fn queue_store(&self) -> &QueueStore {
        &self.queue
    }

    pub fn result_store(&self) -> &ResultStore {
        &self.result
    }

    /// Register a handler that never sees a [`Context`].
    pub async fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Context, Vec<Value>, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = DsqResult<Value>> + Send + 'static,
    {
        let wrapped: HandlerFn = Arc::new(move |ctx, args, kwargs| Box::pin(handler(ctx, args, kwargs)));
        self.handlers
            .write()
            .await
            .insert(name.into(), HandlerEntry::Plain(wrapped));
    }

    /// Register a handler that receives a [`Context`], optionally seeded
    /// with initial state cached across invocations of this task name.
    pub async fn register_with_context<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
        init_state: Option<SharedState>,
    ) where
        F: Fn(Context, Vec<Value>, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = DsqResult<Value>> + Send + 'static,
    {
        let wrapped: HandlerFn = Arc::new(move |ctx, args, kwargs| Box::pin(handler(ctx, args, kwargs)));
        self.handlers
            .write()
            .await
            .insert(name.into(), HandlerEntry::WithContext(wrapped, init_state));
    }

    /// Register `handler` under `name` and return a [`TaskHandle`] bound to
    /// `push_defaults` (with `queue` layered on top, taking priority) — the
    /// `@manager.task` binding: `handle.call(...)` enqueues with those
    /// defaults, `handle.call_sync(...)` invokes the handler directly, and
    /// `handle.run_with(...)` derives a handle with overridden defaults.
    pub async fn task<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        queue: Option<String>,
        with_context: bool,
        init_state: Option<SharedState>,
        push_defaults: TaskDefaults,
        handler: F,
    ) -> TaskHandle
    where
        F: Fn(Context, Vec<Value>, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = DsqResult<Value>> + Send + 'static,
    {
        let name = name.into();
        if with_context || init_state.is_some() {
            self.register_with_context(name.clone(), handler, init_state).await;
        } else {
            self.register(name.clone(), handler).await;
        }
        TaskHandle {
            manager: self.clone(),
            name,
            defaults: TaskDefaults {
                queue: queue.or(push_defaults.queue),
                ..push_defaults
            },
        }
    }

    fn entry_parts(entry: HandlerEntry) -> (HandlerFn, Option<SharedState>) {
        match entry {
            HandlerEntry::Plain(f) => (f, None),
            HandlerEntry::WithContext(f, seed) => (f, seed),
        }
    }

    /// Resolve the cached state for `name`, seeding it with `init_state` the
    /// first time a stateful handler runs.
    async fn state_for(&self, name: &str, init_state: Option<SharedState>) -> Option<SharedState> {
        match init_state {
            Some(seed) => {
                let mut cache = self.state.write().await;
                Some(cache.entry(name.to_string()).or_insert_with(|| seed).clone())
            }
            None => None,
        }
    }

    /// Call a registered handler directly, bypassing the queue entirely —
    /// used by [`TaskHandle::call_sync`]. Builds a synthetic envelope purely
    /// so `Context::task` reflects the name and arguments of this call.
    async fn invoke(
        self: &Arc<Self>,
        name: &str,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> DsqResult<Value> {
        let entry = self
            .handlers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DsqError::UnknownTask(name.to_string()))?;
        let (handler, init_state) = Self::entry_parts(entry);
        let state = self.state_for(name, init_state).await;
        let task = TaskEnvelope {
            id: make_id(),
            name: name.to_string(),
            queue: None,
            args: args.clone(),
            kwargs: kwargs.clone(),
            meta: None,
            expire: None,
            dead: None,
            retry: None,
            retry_delay: None,
            timeout: None,
            keep_result: None,
        };
        let ctx = Context {
            manager: self.clone(),
            task,
            state,
        };
        handler(ctx, args, kwargs).await
    }

    /// Enqueue (or, in sync mode, immediately run) a task.
    pub async fn push(self: &Arc<Self>, opts: PushOptions) -> DsqResult<PushResult> {
        let queue = opts.queue.clone().unwrap_or_else(|| self.default_queue.clone());
        let now = unix_now();

        if self.sync {
            let envelope = TaskEnvelope {
                id: make_id(),
                name: opts.name,
                queue: Some(queue),
                args: opts.args,
                kwargs: opts.kwargs,
                meta: opts.meta,
                expire: None,
                dead: opts.dead,
                retry: opts.retry,
                retry_delay: opts.retry_delay,
                timeout: opts.timeout,
                keep_result: opts.keep_result,
            };
            let id = envelope.id.clone();
            let value = self.process(envelope, Some(now), true).await?;
            return Ok(PushResult::resolved_now(self.clone(), id, value));
        }

        let expire = opts.ttl.map(|ttl| now + ttl as f64);
        let eta = opts.eta.or_else(|| opts.delay.map(|d| now + d as f64));
        let id = make_id();
        let envelope = TaskEnvelope {
            id: id.clone(),
            name: opts.name,
            queue: None,
            args: opts.args,
            kwargs: opts.kwargs,
            meta: opts.meta,
            expire,
            dead: opts.dead,
            retry: opts.retry,
            retry_delay: opts.retry_delay,
            timeout: opts.timeout,
            keep_result: opts.keep_result,
        };
        self.queue.push(&queue, &envelope, eta).await?;
        Ok(PushResult::pending(self.clone(), id))
    }

    /// Pop the next ready task across `queues`, attaching the queue it came
    /// from to the decoded envelope.
    pub async fn pop(&self, queues: &[String], timeout: u64) -> DsqResult<Option<TaskEnvelope>> {
        let (popped_queue, task) = self.queue.pop(queues, timeout).await?;
        Ok(match (popped_queue, task) {
            (Some(q), Some(mut t)) => {
                t.queue = Some(q);
                Some(t)
            }
            _ => None,
        })
    }

    /// Run `task` to completion: expiry check, handler lookup, invocation,
    /// and the retry/dead-letter/result bookkeeping for failures.
    pub async fn process(
        self: &Arc<Self>,
        task: TaskEnvelope,
        now: Option<f64>,
        log_exc: bool,
    ) -> DsqResult<Option<Value>> {
        let now = now.unwrap_or_else(unix_now);

        if let Some(expire) = task.expire {
            if now > expire {
                return Ok(None);
            }
        }

        let entry = self.handlers.read().await.get(&task.name).cloned();
        let entry = match entry {
            Some(entry) => entry,
            None => {
                if self.sync {
                    return Err(DsqError::UnknownTask(task.name.clone()));
                }
                let unknown_queue = self.unknown_queue.clone();
                warn!(task = %task.format(), queue = %unknown_queue, "routing unknown task");
                self.queue.push(&unknown_queue, &task, None).await?;
                return Ok(None);
            }
        };

        let (handler, init_state) = Self::entry_parts(entry);
        let state = self.state_for(&task.name, init_state).await;

        let ctx = Context {
            manager: self.clone(),
            task: task.clone(),
            state,
        };

        match handler(ctx, task.args.clone(), task.kwargs.clone()).await {
            Ok(value) => {
                if let Some(keep) = task.keep_result {
                    self.result
                        .set(
                            &task.id,
                            &ResultRecord::Success {
                                value: value.clone(),
                            },
                            keep,
                        )
                        .await?;
                }
                Ok(Some(value))
            }
            Err(DsqError::StopWorker) => Err(DsqError::StopWorker),
            Err(e) => {
                if self.sync {
                    return Err(e);
                }
                if log_exc {
                    error!(task = %task.format(), error = %e, "task failed");
                }

                let mut task = task;
                if let Some(mut retry) = task.retry.clone() {
                    if retry.can_retry() {
                        retry.decrement();
                        task.retry = Some(retry);
                        let delay = task.retry_delay.or(self.default_retry_delay);
                        let eta = delay.map(|d| now + d as f64);
                        let queue = task.queue.clone().unwrap_or_else(|| self.default_queue.clone());
                        self.queue.push(&queue, &task, eta).await?;
                        return Ok(None);
                    }
                    task.retry = Some(retry);
                }

                if let Some(dead) = task.dead.clone() {
                    task.retry = None;
                    task.retry_delay = None;
                    self.queue.push(&dead, &task, None).await?;
                }

                if let Some(keep) = task.keep_result {
                    let (kind, message, trace) = match &e {
                        DsqError::TaskFailed {
                            kind,
                            message,
                            trace,
                        } => (kind.clone(), message.clone(), trace.clone()),
                        other => (other.to_string(), other.to_string(), String::new()),
                    };
                    self.result
                        .set(&task.id, &ResultRecord::Error { error: kind, message, trace }, keep)
                        .await?;
                }

                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<Manager> {
        Arc::new(Manager::new(
            QueueStore::new("redis://127.0.0.1:6379").unwrap(),
            ResultStore::new("redis://127.0.0.1:6379").unwrap(),
        ))
    }

    #[tokio::test]
    async fn task_call_sync_invokes_handler_directly() {
        let manager = manager();
        let handle = manager
            .task(
                "add",
                None,
                false,
                None,
                TaskDefaults::default(),
                |_ctx, args, _kwargs| async move {
                    let a = args[0].as_i64().unwrap();
                    let b = args[1].as_i64().unwrap();
                    Ok(Value::from(a + b))
                },
            )
            .await;

        let sum = handle
            .call_sync(vec![Value::from(1), Value::from(2)], HashMap::new())
            .await
            .unwrap();
        assert_eq!(sum.as_i64(), Some(3));
    }

    #[tokio::test]
    async fn run_with_overrides_layer_over_existing_defaults() {
        let manager = manager();
        let handle = manager
            .task(
                "noop",
                Some("orig".to_string()),
                false,
                None,
                TaskDefaults {
                    ttl: Some(5),
                    ..Default::default()
                },
                |_ctx, _args, _kwargs| async move { Ok(Value::Nil) },
            )
            .await;

        let derived = handle.run_with(TaskDefaults {
            queue: Some("bar".to_string()),
            dead: Some("dead".to_string()),
            ..Default::default()
        });
        assert_eq!(derived.defaults.queue.as_deref(), Some("bar"));
        assert_eq!(derived.defaults.dead.as_deref(), Some("dead"));
        assert_eq!(derived.defaults.ttl, Some(5));
    }

    #[tokio::test]
    async fn task_with_context_sees_own_name_and_manager() {
        let manager = manager();
        let handle = manager
            .task(
                "ctx_task",
                None,
                true,
                None,
                TaskDefaults::default(),
                |ctx, args, _kwargs| async move {
                    assert_eq!(ctx.task.name, "ctx_task");
                    Ok(args[0].clone())
                },
            )
            .await;

        let result = handle
            .call_sync(vec![Value::from("ok")], HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.as_str(), Some("ok"));
    }

    #[tokio::test]
    async fn call_sync_on_unknown_task_errors() {
        let manager = manager();
        let err = manager.invoke("missing", vec![], HashMap::new()).await.unwrap_err();
        assert!(matches!(err, DsqError::UnknownTask(_)));
    }
}
