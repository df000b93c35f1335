//! Task envelopes: the wire format pushed through [`crate::store::QueueStore`]
//! and exchanged between [`crate::manager::Manager`] and registered handlers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::Value;

/// Remaining retry budget carried on a task envelope.
///
/// Mirrors the original store's convention of storing either `true`
/// (infinite) or a non-negative integer in the `retry` field. `Flag(false)`
/// is accepted on decode for symmetry but behaves like no retry at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Retry {
    Flag(bool),
    Count(u32),
}

impl Retry {
    /// Shorthand for the infinite-retry value.
    pub const INFINITE: Retry = Retry::Flag(true);

    /// `true` when at least one more attempt is allowed.
    pub fn can_retry(&self) -> bool {
        match self {
            Retry::Flag(b) => *b,
            Retry::Count(n) => *n > 0,
        }
    }

    /// Decrement in place; the infinite flag is left untouched.
    pub fn decrement(&mut self) {
        if let Retry::Count(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl fmt::Display for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retry::Flag(true) => write!(f, "infinite"),
            Retry::Flag(false) => write!(f, "0"),
            Retry::Count(n) => write!(f, "{n}"),
        }
    }
}

/// A task invocation as it is pushed, stored, popped, and re-pushed.
///
/// Fields with no value are omitted from the wire encoding entirely
/// (absent, not nil) — see [`crate::codec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Opaque id, stable across retries/dead-lettering/forwarder moves.
    pub id: String,
    /// Registered handler name.
    pub name: String,
    /// Target queue. Assigned on pop; carried through on re-push.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<HashMap<String, Value>>,
    /// Absolute unix timestamp; a task popped after this is silently dropped.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expire: Option<f64>,
    /// Queue to route to once `retry` is exhausted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dead: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry: Option<Retry>,
    /// Seconds to postpone a retried task; absent means re-push immediately.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_delay: Option<u64>,
    /// Per-task execution deadline in seconds, overriding the worker default.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<u64>,
    /// Seconds for which to retain the result record after completion.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub keep_result: Option<u64>,
}

impl TaskEnvelope {
    /// The queue a popped task came from, or the configured default for a
    /// not-yet-pushed one.
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or("dsq")
    }

    /// `name(args, kwargs)#id`, matching the original formatter used in
    /// logs and error traces.
    pub fn format(&self) -> String {
        let args = self
            .args
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", ");
        let kwargs = {
            let mut pairs: Vec<_> = self.kwargs.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            pairs
                .into_iter()
                .map(|(k, v)| format!("{k}={}", format_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let joined = if kwargs.is_empty() {
            args
        } else if args.is_empty() {
            kwargs
        } else {
            format!("{args}, {kwargs}")
        };
        format!("{}({})#{}", self.name, joined, self.id)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "None".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::String(s) => format!("{:?}", s.as_str().unwrap_or("")),
        v => v.to_string(),
    }
}

/// Generate a short opaque task id: url-safe base64 of 16 random bytes with
/// the trailing `=` padding stripped, matching `dsq.utils.make_id`.
pub fn make_id() -> String {
    use base64::{engine::general_purpose::URL_SAFE, Engine as _};
    let mut bytes = [0u8; 16];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE.encode(bytes).trim_end_matches('=').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_has_no_padding() {
        let id = make_id();
        assert!(!id.contains('='));
        assert!(id.len() >= 20);
    }

    #[test]
    fn retry_decrement_saturates() {
        let mut r = Retry::Count(0);
        r.decrement();
        assert_eq!(r, Retry::Count(0));
        assert!(!r.can_retry());
    }

    #[test]
    fn infinite_retry_never_exhausts() {
        let mut r = Retry::INFINITE;
        r.decrement();
        assert!(r.can_retry());
    }

    #[test]
    fn infinite_retry_round_trips_as_bool_true() {
        let bytes = crate::codec::encode(&Retry::INFINITE).unwrap();
        let decoded: Retry = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, Retry::INFINITE);

        let json = serde_json::to_string(&Retry::INFINITE).unwrap();
        assert_eq!(json, "true");
    }

    #[test]
    fn format_matches_name_args_kwargs_id() {
        let mut kwargs = HashMap::new();
        kwargs.insert("x".to_string(), Value::from(1));
        let env = TaskEnvelope {
            id: "abc".to_string(),
            name: "boo".to_string(),
            queue: None,
            args: vec![Value::from(1), Value::from(2)],
            kwargs,
            meta: None,
            expire: None,
            dead: None,
            retry: None,
            retry_delay: None,
            timeout: None,
            keep_result: None,
        };
        assert_eq!(env.format(), "boo(1, 2, x=1)#abc");
    }
}
