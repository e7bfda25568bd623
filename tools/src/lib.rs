//! deskcheck toolbox core
//!
//! Registry of diagnostic tools, the execution dispatcher that runs them and
//! the live-status hub that streams monitored tools to viewers.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod hub;
pub mod monitor;
pub mod observe;
pub mod registry;
pub mod store;
pub mod tool;

pub use config::{ExecutorConfig, MonitorConfig, ToolboxConfig};
pub use context::AppContext;
pub use error::{Result, StrategyError, ToolboxError};
pub use executor::{Envelope, Executor};
pub use hub::{MonitorHub, Session};
pub use monitor::{blocking_status, status_fn, MonitorSpec, RetryPolicy, StatusSource};
pub use observe::{Observable, Observer, ObserverId};
pub use registry::Registry;
pub use store::{Document, FileStore};
pub use tool::{
    blocking_strategy, strategy_fn, ExecutionStrategy, KindTag, Params, ResultMap, Tag, Tool,
    ToolKind, ToolSummary,
};
