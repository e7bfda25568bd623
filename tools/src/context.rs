//! Application context
//!
//! Wires the store, registry, executor and monitor hub together once at
//! startup. Everything is handed out as `Arc`s so transports can clone the
//! context freely.

use std::sync::Arc;

use tracing::info;

use crate::config::ToolboxConfig;
use crate::error::Result;
use crate::executor::{Envelope, Executor};
use crate::hub::{MonitorHub, Session};
use crate::registry::Registry;
use crate::store::FileStore;
use crate::tool::{Params, Tool, ToolSummary};

#[derive(Clone)]
pub struct AppContext {
    config: Arc<ToolboxConfig>,
    store: Arc<FileStore>,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    hub: Arc<MonitorHub>,
}

impl AppContext {
    /// Build the context and load persisted toggle state
    pub async fn bootstrap(config: ToolboxConfig) -> Result<Self> {
        let store = Arc::new(FileStore::new(&config.data_dir));
        let registry = Arc::new(Registry::new(store.clone()));
        let restored = registry.load_state().await?;

        let executor = Arc::new(Executor::new(
            registry.clone(),
            store.clone(),
            &config.executor,
        ));
        let hub = Arc::new(MonitorHub::new(registry.clone(), config.monitor.clone()));

        info!(
            "Toolbox ready: data_dir={} restored_toggles={}",
            config.data_dir.display(),
            restored
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            executor,
            hub,
        })
    }

    pub fn register(&self, tool: Tool) -> Result<()> {
        self.registry.add(tool)
    }

    /// Register several tools, stopping at the first rejection
    pub fn register_all(&self, tools: impl IntoIterator<Item = Tool>) -> Result<usize> {
        let mut count = 0;
        for tool in tools {
            self.registry.add(tool)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn dashboard(&self) -> Vec<ToolSummary> {
        self.registry.dashboard()
    }

    pub async fn execute(&self, tool_id: &str, params: Params) -> Envelope {
        self.executor.execute(tool_id, params).await
    }

    pub fn watch(&self, tool_id: &str) -> Result<Session> {
        self.hub.open(tool_id)
    }

    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn hub(&self) -> &Arc<MonitorHub> {
        &self.hub
    }

    /// Stop monitor loops and flush pending result snapshots
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
        self.executor.drain().await;
        info!("Toolbox shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolboxError;
    use crate::registry::TOGGLE_STATE_KEY;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_creates_state_document() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::bootstrap(ToolboxConfig::with_data_dir(dir.path()))
            .await
            .unwrap();

        assert!(ctx.store().read(TOGGLE_STATE_KEY).await.unwrap().is_empty());
        assert_eq!(ctx.registry().tool_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let ctx = AppContext::bootstrap(ToolboxConfig::with_data_dir(dir.path()))
                .await
                .unwrap();
            ctx.register(Tool::toggle("low-wifi-notifs")).unwrap();
            let envelope = ctx.execute("low-wifi-notifs", Params::new()).await;
            assert_eq!(envelope.data, Some(json!({"state": false})));
            ctx.shutdown().await;
        }

        let ctx = AppContext::bootstrap(ToolboxConfig::with_data_dir(dir.path()))
            .await
            .unwrap();
        ctx.register(Tool::toggle("low-wifi-notifs")).unwrap();
        let summary = ctx.dashboard().pop().unwrap();
        assert_eq!(summary.state, Some(false));
    }

    #[tokio::test]
    async fn test_register_all_stops_at_duplicate() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::bootstrap(ToolboxConfig::with_data_dir(dir.path()))
            .await
            .unwrap();

        let err = ctx
            .register_all([
                Tool::toggle("a"),
                Tool::toggle("b"),
                Tool::toggle("a"),
                Tool::toggle("c"),
            ])
            .unwrap_err();
        assert!(matches!(err, ToolboxError::DuplicateTool(_)));
        assert_eq!(ctx.registry().tool_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_state_fails_bootstrap() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tool_state.json"), "{ nope").unwrap();

        let err = AppContext::bootstrap(ToolboxConfig::with_data_dir(dir.path()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "parse");
    }
}
