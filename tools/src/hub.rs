//! Live-status hub
//!
//! Keeps at most one monitor loop per tool. The loop starts with the first
//! viewer session and stops when the last one goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::error::{Result, ToolboxError};
use crate::monitor::MonitorLoop;
use crate::observe::{Attach, Observable, Observer, ObserverId};
use crate::registry::Registry;

type Observables = Arc<Mutex<HashMap<String, Arc<Observable>>>>;

fn lock(map: &Observables) -> MutexGuard<'_, HashMap<String, Arc<Observable>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MonitorHub {
    registry: Arc<Registry>,
    config: MonitorConfig,
    observables: Observables,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl MonitorHub {
    pub fn new(registry: Arc<Registry>, config: MonitorConfig) -> Self {
        Self {
            registry,
            config,
            observables: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Open a viewer session on a monitorable tool.
    ///
    /// Starts the tool's loop if nobody was watching it. A viewer joining a
    /// running loop first receives the latest snapshot.
    pub fn open(&self, tool_id: &str) -> Result<Session> {
        let tool = self.registry.get(tool_id)?;
        let spec = tool
            .monitor()
            .ok_or_else(|| ToolboxError::NotMonitorable(tool_id.to_string()))?;

        let (observer, rx) = Observer::channel(self.config.channel_capacity);
        let observer_id = observer.id();

        let (observable, spawn) = {
            let mut map = lock(&self.observables);
            let joined = map
                .get(tool_id)
                .filter(|existing| existing.attach(observer.clone()) != Attach::Closed)
                .cloned();
            match joined {
                Some(existing) => (existing, false),
                // nobody watching, or the previous loop is winding down
                None => {
                    let fresh = Arc::new(Observable::new(tool_id));
                    fresh.attach(observer);
                    map.insert(tool_id.to_string(), fresh.clone());
                    (fresh, true)
                }
            }
        };

        if spawn {
            let monitor = MonitorLoop::new(tool_id, spec, &self.config);
            let cancel = self.shutdown.child_token();
            let observables = self.observables.clone();
            let running = observable.clone();
            let id = tool_id.to_string();

            self.tasks.spawn(async move {
                let _cleanup = LoopCleanup {
                    id,
                    observable: running.clone(),
                    observables,
                };
                monitor.run(running, cancel).await;
            });
        }

        debug!("Session {observer_id} opened on {tool_id}");
        Ok(Session {
            tool_id: tool_id.to_string(),
            observer_id,
            observable,
            rx,
        })
    }

    /// Force-stop a tool's loop, ending every session on it
    pub fn stop(&self, tool_id: &str) -> bool {
        let removed = lock(&self.observables).remove(tool_id);
        match removed {
            Some(observable) => {
                info!("Stopping monitor for {tool_id}");
                observable.close();
                true
            }
            None => false,
        }
    }

    /// Ids of tools with a running loop
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.observables)
            .iter()
            .filter(|(_, o)| !o.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, tool_id: &str) -> bool {
        lock(&self.observables)
            .get(tool_id)
            .is_some_and(|o| !o.is_closed())
    }

    /// Cancel every loop and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let drained: Vec<Arc<Observable>> =
            lock(&self.observables).drain().map(|(_, o)| o).collect();
        for observable in drained {
            observable.close();
        }
        info!("Monitor hub stopped");
    }
}

/// Closes a loop's observable and drops its map entry however the loop task
/// ends, panics included
struct LoopCleanup {
    id: String,
    observable: Arc<Observable>,
    observables: Observables,
}

impl Drop for LoopCleanup {
    fn drop(&mut self) {
        self.observable.close();
        let mut map = lock(&self.observables);
        if map
            .get(&self.id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.observable))
        {
            map.remove(&self.id);
        }
    }
}

/// One viewer's subscription to a tool's live status.
///
/// Dropping the session detaches its observer.
pub struct Session {
    tool_id: String,
    observer_id: ObserverId,
    observable: Arc<Observable>,
    rx: mpsc::Receiver<Value>,
}

impl Session {
    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }

    /// Next snapshot, or `None` once the loop has stopped
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn close(self) {}
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tool_id", &self.tool_id)
            .field("observer_id", &self.observer_id)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.observable.detach(self.observer_id) {
            debug!("Session {} closed on {}", self.observer_id, self.tool_id);
        }
    }
}
