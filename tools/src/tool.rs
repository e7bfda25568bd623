//! Tool definitions: shared metadata plus a closed set of kind payloads

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StrategyError, ToolboxError};
use crate::monitor::MonitorSpec;

/// Parameters passed to an execution strategy
pub type Params = BTreeMap<String, String>;

/// Raw output of an execution strategy
pub type ResultMap = Map<String, Value>;

/// Runs one executable tool.
///
/// Strategies that block (subprocesses, native queries) should be wrapped
/// with [`blocking_strategy`] so they run on the blocking pool.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute(&self, params: Params) -> std::result::Result<ResultMap, StrategyError>;
}

struct FnStrategy<F>(F);

#[async_trait]
impl<F, Fut> ExecutionStrategy for FnStrategy<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ResultMap, StrategyError>> + Send,
{
    async fn execute(&self, params: Params) -> std::result::Result<ResultMap, StrategyError> {
        (self.0)(params).await
    }
}

/// Wrap an async function as a strategy
pub fn strategy_fn<F, Fut>(f: F) -> Arc<dyn ExecutionStrategy>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ResultMap, StrategyError>> + Send + 'static,
{
    Arc::new(FnStrategy(f))
}

struct BlockingStrategy<F>(Arc<F>);

#[async_trait]
impl<F> ExecutionStrategy for BlockingStrategy<F>
where
    F: Fn(Params) -> std::result::Result<ResultMap, StrategyError> + Send + Sync + 'static,
{
    async fn execute(&self, params: Params) -> std::result::Result<ResultMap, StrategyError> {
        let f = self.0.clone();
        tokio::task::spawn_blocking(move || f(params))
            .await
            .map_err(|e| StrategyError::Unknown(format!("blocking probe failed: {e}")))?
    }
}

/// Wrap a synchronous probe as a strategy that runs on the blocking pool
pub fn blocking_strategy<F>(f: F) -> Arc<dyn ExecutionStrategy>
where
    F: Fn(Params) -> std::result::Result<ResultMap, StrategyError> + Send + Sync + 'static,
{
    Arc::new(BlockingStrategy(Arc::new(f)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tag {
    #[serde(rename = "Identity Services")]
    IdentityServices,
    Network,
    Internet,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindTag {
    Executable,
    Toggle,
    Utility,
}

/// Payload of an executable tool
#[derive(Clone)]
pub struct Executable {
    strategy: Arc<dyn ExecutionStrategy>,
    /// dotted output path -> short name
    capture: Option<BTreeMap<String, String>>,
    timeout: Option<Duration>,
}

impl Executable {
    pub fn strategy(&self) -> &Arc<dyn ExecutionStrategy> {
        &self.strategy
    }

    pub fn capture(&self) -> Option<&BTreeMap<String, String>> {
        self.capture.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("capture", &self.capture)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum ToolKind {
    Executable(Executable),
    Toggle { state: bool },
    Utility { route: String },
}

impl ToolKind {
    pub fn tag(&self) -> KindTag {
        match self {
            ToolKind::Executable(_) => KindTag::Executable,
            ToolKind::Toggle { .. } => KindTag::Toggle,
            ToolKind::Utility { .. } => KindTag::Utility,
        }
    }
}

/// A registered unit of dashboard functionality.
///
/// Built with one of the kind constructors and the `with_*` methods, then
/// handed to the registry. Only a toggle's `state` changes after that.
#[derive(Debug, Clone)]
pub struct Tool {
    id: String,
    name: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    tags: BTreeSet<Tag>,
    visible: bool,
    kind: ToolKind,
    monitor: Option<MonitorSpec>,
}

impl Tool {
    fn with_kind(id: &str, kind: ToolKind) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            description: None,
            icon: None,
            tags: BTreeSet::new(),
            visible: false,
            kind,
            monitor: None,
        }
    }

    pub fn executable(id: &str, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        Self::with_kind(
            id,
            ToolKind::Executable(Executable {
                strategy,
                capture: None,
                timeout: None,
            }),
        )
    }

    /// A toggle starts enabled until the registry seeds it from persisted state
    pub fn toggle(id: &str) -> Self {
        Self::with_kind(id, ToolKind::Toggle { state: true })
    }

    pub fn utility(id: &str, route: &str) -> Self {
        Self::with_kind(
            id,
            ToolKind::Utility {
                route: route.to_string(),
            },
        )
    }

    /// Set display metadata and make the tool visible on the dashboard
    pub fn with_display(mut self, name: &str, description: &str, icon: &str) -> Self {
        self.name = Some(name.to_string());
        self.description = Some(description.to_string());
        self.icon = Some(icon.to_string());
        self.visible = true;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Persist selected result fields after each successful run.
    /// Ignored for non-executable tools.
    pub fn with_capture<I, P, N>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (P, N)>,
        P: Into<String>,
        N: Into<String>,
    {
        if let ToolKind::Executable(exec) = &mut self.kind {
            exec.capture = Some(
                fields
                    .into_iter()
                    .map(|(p, n)| (p.into(), n.into()))
                    .collect(),
            );
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let ToolKind::Executable(exec) = &mut self.kind {
            exec.timeout = Some(timeout);
        }
        self
    }

    pub fn with_monitor(mut self, spec: MonitorSpec) -> Self {
        self.monitor = Some(spec);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn kind(&self) -> &ToolKind {
        &self.kind
    }

    pub fn monitor(&self) -> Option<&MonitorSpec> {
        self.monitor.as_ref()
    }

    /// Name used for ordering listings; falls back to the id for hidden tools
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Current toggle state, `None` for other kinds
    pub fn state(&self) -> Option<bool> {
        match self.kind {
            ToolKind::Toggle { state } => Some(state),
            _ => None,
        }
    }

    pub(crate) fn set_state(&mut self, value: bool) {
        if let ToolKind::Toggle { state } = &mut self.kind {
            *state = value;
        }
    }

    /// Default dashboard view: visible executables, every toggle and utility
    pub fn on_dashboard(&self) -> bool {
        match self.kind {
            ToolKind::Executable(_) => self.visible,
            ToolKind::Toggle { .. } | ToolKind::Utility { .. } => true,
        }
    }

    /// Check metadata before registration
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ToolboxError::validation(&self.id, "id is required"));
        }
        if self
            .id
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(ToolboxError::validation(
                &self.id,
                "id must not contain whitespace or path separators",
            ));
        }

        if self.visible {
            let missing: Vec<&str> = [
                ("name", &self.name),
                ("description", &self.description),
                ("icon", &self.icon),
            ]
            .into_iter()
            .filter(|(_, v)| v.as_deref().map_or(true, |s| s.trim().is_empty()))
            .map(|(field, _)| field)
            .collect();

            if !missing.is_empty() {
                return Err(ToolboxError::validation(
                    &self.id,
                    format!("visible tools need {}", missing.join(", ")),
                ));
            }
        }

        match &self.kind {
            ToolKind::Utility { route } if !route.starts_with('/') => Err(
                ToolboxError::validation(&self.id, format!("route must start with '/': {route}")),
            ),
            ToolKind::Executable(exec) => match &exec.capture {
                Some(fields) if fields.is_empty() => Err(ToolboxError::validation(
                    &self.id,
                    "capture map must declare at least one field",
                )),
                Some(fields) => fields
                    .iter()
                    .find(|(path, name)| {
                        name.is_empty() || path.is_empty() || path.split('.').any(str::is_empty)
                    })
                    .map_or(Ok(()), |(path, name)| {
                        Err(ToolboxError::validation(
                            &self.id,
                            format!("bad capture entry '{path}' -> '{name}'"),
                        ))
                    }),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub fn summary(&self) -> ToolSummary {
        let (state, route) = match &self.kind {
            ToolKind::Toggle { state } => (Some(*state), None),
            ToolKind::Utility { route } => (None, Some(route.clone())),
            ToolKind::Executable(_) => (None, None),
        };

        ToolSummary {
            id: self.id.clone(),
            kind: self.kind.tag(),
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            tags: self.tags.iter().copied().collect(),
            visible: self.visible,
            state,
            route,
            monitorable: self.monitor.is_some(),
        }
    }
}

/// Serializable view of a tool for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub id: String,
    pub kind: KindTag,
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub tags: Vec<Tag>,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub monitorable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Arc<dyn ExecutionStrategy> {
        strategy_fn(|_| async { Ok(ResultMap::new()) })
    }

    #[test]
    fn test_kind_constructors() {
        assert_eq!(Tool::executable("disk-usage", noop()).kind().tag(), KindTag::Executable);
        assert_eq!(Tool::toggle("low-wifi-notifs").state(), Some(true));
        assert_eq!(Tool::utility("vpn-helper", "/vpn").kind().tag(), KindTag::Utility);
        assert_eq!(Tool::utility("vpn-helper", "/vpn").state(), None);
    }

    #[test]
    fn test_hidden_tool_needs_only_id() {
        assert!(Tool::executable("ad-status", noop()).validate().is_ok());
    }

    #[test]
    fn test_empty_or_unsafe_id_rejected() {
        for id in ["", "has space", "a/b"] {
            let err = Tool::toggle(id).validate().unwrap_err();
            assert!(matches!(err, ToolboxError::Validation { .. }), "{id:?}");
        }
    }

    #[test]
    fn test_visible_tool_requires_display_metadata() {
        let tool = Tool::toggle("low-wifi-notifs").with_visibility(true);
        let err = tool.validate().unwrap_err();
        assert!(err.to_string().contains("name, description, icon"));

        let tool = Tool::toggle("low-wifi-notifs").with_display("Low Wi-Fi", "  ", "bell");
        let err = tool.validate().unwrap_err();
        assert!(err.to_string().contains("description"));

        let tool = Tool::toggle("low-wifi-notifs").with_display("Low Wi-Fi", "Alerts", "bell");
        assert!(tool.validate().is_ok());
    }

    #[test]
    fn test_utility_route_must_be_absolute() {
        assert!(Tool::utility("vpn-helper", "vpn").validate().is_err());
        assert!(Tool::utility("vpn-helper", "/widgets/vpn").validate().is_ok());
    }

    #[test]
    fn test_capture_entries_validated() {
        let ok = Tool::executable("wifi-details", noop()).with_capture([("signal.overall", "overall")]);
        assert!(ok.validate().is_ok());

        let bad = Tool::executable("wifi-details", noop()).with_capture([("signal..overall", "overall")]);
        assert!(bad.validate().is_err());

        let empty = Tool::executable("wifi-details", noop())
            .with_capture(Vec::<(String, String)>::new());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_capture_ignored_for_toggles() {
        let tool = Tool::toggle("t").with_capture([("a", "b")]).with_timeout(Duration::from_secs(1));
        assert!(matches!(tool.kind(), ToolKind::Toggle { state: true }));
    }

    #[test]
    fn test_dashboard_predicate() {
        assert!(!Tool::executable("hidden", noop()).on_dashboard());
        assert!(Tool::executable("shown", noop())
            .with_display("Shown", "d", "i")
            .on_dashboard());
        assert!(Tool::toggle("t").on_dashboard());
        assert!(Tool::utility("u", "/u").on_dashboard());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let tool = Tool::toggle("low-wifi-notifs")
            .with_display("Low Wi-Fi Notifications", "Alerts", "notification_icon")
            .with_tags([Tag::Network, Tag::Internet]);

        let value = serde_json::to_value(tool.summary()).unwrap();
        assert_eq!(value["kind"], "toggle");
        assert_eq!(value["state"], true);
        assert_eq!(value["monitorable"], false);
        assert_eq!(value["tags"], json!(["Network", "Internet"]));
        assert!(value.get("route").is_none());
    }

    #[test]
    fn test_tag_display_strings() {
        assert_eq!(
            serde_json::to_value(Tag::IdentityServices).unwrap(),
            json!("Identity Services")
        );
    }

    #[tokio::test]
    async fn test_blocking_strategy_runs_on_pool() {
        let strategy = blocking_strategy(|params| {
            let mut out = ResultMap::new();
            out.insert(
                "echo".into(),
                Value::String(params.get("msg").cloned().unwrap_or_default()),
            );
            Ok(out)
        });

        let mut params = Params::new();
        params.insert("msg".into(), "hi".into());
        let out = strategy.execute(params).await.unwrap();
        assert_eq!(out["echo"], "hi");
    }
}
