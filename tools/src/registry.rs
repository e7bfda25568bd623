//! Tool registry: registered tools and the persisted toggle state

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, ToolboxError};
use crate::store::{Document, FileStore};
use crate::tool::{Tool, ToolKind, ToolSummary};

/// Store key of the document holding every toggle's state
pub const TOGGLE_STATE_KEY: &str = "tool_state";

pub struct Registry {
    store: Arc<FileStore>,
    tools: RwLock<HashMap<String, Tool>>,
    state_cache: Mutex<HashMap<String, bool>>,
    /// Serializes flip-and-persist so concurrent toggles cannot persist
    /// out of order
    toggle_gate: tokio::sync::Mutex<()>,
}

impl Registry {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self {
            store,
            tools: RwLock::new(HashMap::new()),
            state_cache: Mutex::new(HashMap::new()),
            toggle_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.state_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a tool. Toggles start from their persisted state, or enabled
    /// when none was saved.
    pub fn add(&self, mut tool: Tool) -> Result<()> {
        tool.validate()?;

        if tool.state().is_some() {
            let seeded = self.cache().get(tool.id()).copied().unwrap_or(true);
            tool.set_state(seeded);
        }

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(tool.id()) {
            return Err(ToolboxError::DuplicateTool(tool.id().to_string()));
        }

        info!(
            "Registered tool: {} ({:?})",
            tool.id(),
            tool.kind().tag()
        );
        tools.insert(tool.id().to_string(), tool);
        Ok(())
    }

    /// Get a tool by id
    pub fn get(&self, id: &str) -> Result<Tool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ToolboxError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Tools matching `predicate`, ordered by display name
    pub fn list<P>(&self, predicate: P) -> Vec<Tool>
    where
        P: Fn(&Tool) -> bool,
    {
        let mut matched: Vec<Tool> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
                .then_with(|| a.id().cmp(b.id()))
        });
        matched
    }

    /// The default dashboard listing
    pub fn dashboard(&self) -> Vec<ToolSummary> {
        self.list(Tool::on_dashboard)
            .iter()
            .map(Tool::summary)
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Load the toggle document into the cache, creating an empty one when
    /// none exists. Already registered toggles pick up the loaded values.
    pub async fn load_state(&self) -> Result<usize> {
        let document = match self.store.read(TOGGLE_STATE_KEY).await {
            Ok(doc) => doc,
            Err(e) if e.is_missing_file() => {
                info!("No saved toggle state, creating {TOGGLE_STATE_KEY}");
                self.store.write(TOGGLE_STATE_KEY, Document::new()).await?;
                Document::new()
            }
            Err(e) => return Err(e),
        };

        let mut loaded = HashMap::new();
        for (id, value) in document {
            match saved_flag(&value) {
                Some(flag) => {
                    loaded.insert(id, flag);
                }
                None => warn!("Ignoring unreadable saved state for {id}: {value}"),
            }
        }

        {
            let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
            for (id, flag) in &loaded {
                if let Some(tool) = tools.get_mut(id) {
                    tool.set_state(*flag);
                }
            }
        }

        let count = loaded.len();
        *self.cache() = loaded;
        info!("Loaded saved state for {count} toggle(s)");
        Ok(count)
    }

    /// Record a toggle value in the cache and write it through to the store.
    /// On a failed write the cache keeps its previous value.
    pub async fn persist_state(&self, id: &str, value: bool) -> Result<()> {
        let previous = self.cache().insert(id.to_string(), value);

        let mut partial = Document::new();
        partial.insert(id.to_string(), Value::Bool(value));

        if let Err(e) = self.store.update(TOGGLE_STATE_KEY, partial).await {
            let mut cache = self.cache();
            match previous {
                Some(old) => cache.insert(id.to_string(), old),
                None => cache.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Cached persisted value for a toggle
    pub fn saved_state(&self, id: &str) -> Option<bool> {
        self.cache().get(id).copied()
    }

    /// Flip a toggle and persist the new value. The in-memory flip is undone
    /// when persisting fails, so memory and disk stay in step.
    pub async fn toggle(&self, id: &str) -> Result<bool> {
        let _gate = self.toggle_gate.lock().await;

        let next = {
            let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
            let tool = tools
                .get_mut(id)
                .ok_or_else(|| ToolboxError::NotFound(id.to_string()))?;
            match tool.kind() {
                ToolKind::Toggle { state } => {
                    let next = !*state;
                    tool.set_state(next);
                    next
                }
                _ => {
                    return Err(ToolboxError::validation(id, "not a toggle tool"));
                }
            }
        };

        if let Err(e) = self.persist_state(id, next).await {
            warn!("Failed to persist toggle {id}: {e}");
            if let Some(tool) = self
                .tools
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(id)
            {
                tool.set_state(!next);
            }
            return Err(e);
        }

        info!("Toggle {id} is now {}", if next { "on" } else { "off" });
        Ok(next)
    }
}

/// Accepts a bare bool or the older `{"state": bool}` record
fn saved_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Object(map) => map.get("state").and_then(Value::as_bool),
        _ => None,
    }
}
