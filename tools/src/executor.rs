//! Tool execution dispatcher
//!
//! Pipeline: look up tool → dispatch on kind → normalize result → capture
//! declared fields in the background. Every call returns an envelope; nothing
//! a strategy does can escape as an error or a panic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::error::{StrategyError, ToolboxError};
use crate::registry::Registry;
use crate::store::{Document, FileStore};
use crate::tool::{Executable, Params, ResultMap, ToolKind};

/// Uniform response for every execute call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn failure(err: &ToolboxError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}

/// Store key of a tool's result snapshot
pub fn result_key(tool_id: &str) -> String {
    format!("results/{tool_id}")
}

pub struct Executor {
    registry: Arc<Registry>,
    store: Arc<FileStore>,
    default_timeout: Duration,
    background: TaskTracker,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, store: Arc<FileStore>, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            store,
            default_timeout: config.default_timeout(),
            background: TaskTracker::new(),
        }
    }

    /// Execute a tool by id
    pub async fn execute(&self, tool_id: &str, params: Params) -> Envelope {
        let start = Instant::now();

        let tool = match self.registry.get(tool_id) {
            Ok(tool) => tool,
            Err(e) => {
                warn!("Execute rejected: {e}");
                return Envelope::failure(&e);
            }
        };

        let envelope = match tool.kind() {
            ToolKind::Executable(exec) => self.run_strategy(tool.id(), exec, params).await,
            ToolKind::Toggle { .. } => match self.registry.toggle(tool.id()).await {
                Ok(state) => Envelope::ok(json!({ "state": state })),
                Err(e) => Envelope::failure(&e),
            },
            ToolKind::Utility { route } => Envelope::ok(json!({ "route": route })),
        };

        info!(
            "Executed: tool={} kind={:?} success={} duration_ms={}",
            tool_id,
            tool.kind().tag(),
            envelope.success,
            start.elapsed().as_millis()
        );
        envelope
    }

    async fn run_strategy(&self, tool_id: &str, exec: &Executable, params: Params) -> Envelope {
        let strategy = exec.strategy().clone();
        let limit = exec.timeout().unwrap_or(self.default_timeout);

        // a separate task turns a panicking strategy into a join error
        let handle =
            tokio::spawn(async move { tokio::time::timeout(limit, strategy.execute(params)).await });

        let outcome = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(StrategyError::Timeout),
            Err(e) => Err(StrategyError::Unknown(format!("strategy aborted: {e}"))),
        };

        match outcome {
            Ok(raw) => {
                if let Some(fields) = exec.capture() {
                    self.capture(tool_id, fields, &raw);
                }
                Envelope::ok(camelize(Value::Object(raw)))
            }
            Err(e) => {
                warn!("Strategy for {tool_id} failed: {e}");
                Envelope::failure(&ToolboxError::Strategy(e))
            }
        }
    }

    /// Write the declared fields of `raw` as the tool's result snapshot
    /// without holding up the caller
    fn capture(&self, tool_id: &str, fields: &BTreeMap<String, String>, raw: &ResultMap) {
        let mut snapshot = Document::new();
        snapshot.insert(
            "capturedAt".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        snapshot.insert(
            "data".to_string(),
            Value::Object(extract_fields(raw, fields)),
        );

        let store = self.store.clone();
        let key = result_key(tool_id);
        self.background.spawn(async move {
            if let Err(e) = store.write(&key, snapshot).await {
                warn!("Failed to save result snapshot {key}: {e}");
            }
        });
    }

    /// Wait for background snapshot writes started so far
    pub async fn drain(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }
}

/// Pick `path -> short name` fields out of a raw result. Paths are dotted;
/// numeric segments index into arrays. A path that leads nowhere yields null.
pub fn extract_fields(raw: &ResultMap, fields: &BTreeMap<String, String>) -> ResultMap {
    fields
        .iter()
        .map(|(path, name)| {
            let value = lookup_path(raw, path).cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect()
}

pub fn lookup_path<'a>(raw: &'a ResultMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = raw.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Rewrite object keys to camelCase at every depth. Values and nesting are
/// left alone. A key keeps its original spelling when its camelCase form is
/// already taken, so no entry is ever overwritten.
pub fn camelize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let originals: HashSet<String> = map.keys().cloned().collect();
            let mut out = ResultMap::new();
            for (key, v) in map {
                let camel = camel_case(&key);
                let key = if camel != key
                    && (originals.contains(&camel) || out.contains_key(&camel))
                {
                    key
                } else {
                    camel
                };
                out.insert(key, camelize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camelize).collect()),
        other => other,
    }
}

/// `is_connected` → `isConnected`, `CPU_details` → `CPUDetails`.
/// Leading underscores are kept; keys without separators only have their
/// first letter lowered unless they are all caps.
pub fn camel_case(key: &str) -> String {
    let body = key.trim_start_matches('_');
    let prefix = &key[..key.len() - body.len()];

    let mut out = String::with_capacity(key.len());
    out.push_str(prefix);

    let mut parts = body.split(['_', '-']).filter(|p| !p.is_empty());
    if let Some(first) = parts.next() {
        let is_acronym = first.chars().all(|c| !c.is_lowercase());
        let mut chars = first.chars();
        if let Some(c) = chars.next() {
            if is_acronym {
                out.push(c);
            } else {
                out.extend(c.to_lowercase());
            }
            out.push_str(chars.as_str());
        }
    }
    for part in parts {
        let mut chars = part.chars();
        if let Some(c) = chars.next() {
            out.extend(c.to_uppercase());
            out.push_str(chars.as_str());
        }
    }

    if out.len() == prefix.len() {
        key.to_string()
    } else {
        out
    }
}
