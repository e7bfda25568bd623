//! Observable / Observer fan-out
//!
//! Each observer is the sending half of a bounded channel; the receiving half
//! belongs to whichever connection forwards updates to a viewer. An
//! observable holds the observers of one monitored tool and pushes snapshots
//! to all of them without ever waiting on a slow one: a full queue drops that
//! observer's copy, a closed queue detaches the observer.
//!
//! The set is copied out under a short lock before delivery, so attach and
//! detach may run while a notification is in progress.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Push handle for one live viewer
#[derive(Debug, Clone)]
pub struct Observer {
    id: ObserverId,
    tx: mpsc::Sender<Value>,
}

impl Observer {
    /// Create an observer and the receiver its transport reads from
    pub fn channel(capacity: usize) -> (Observer, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Observer {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    fn deliver(&self, data: &Value) -> Result<(), Delivery> {
        match self.tx.try_send(data.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Delivery::Full),
            Err(TrySendError::Closed(_)) => Err(Delivery::Disconnected),
        }
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Observer {}

enum Delivery {
    Full,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Attached,
    AlreadyAttached,
    /// The observable has shut down and accepts no new observers
    Closed,
}

/// Result of one notification round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    /// Observers whose queue was full; their copy was dropped
    pub lagging: usize,
    /// Observers whose receiver was gone; they have been detached
    pub disconnected: usize,
}

impl NotifyReport {
    pub fn failed(&self) -> usize {
        self.lagging + self.disconnected
    }
}

#[derive(Default)]
struct ObserverSet {
    observers: HashMap<ObserverId, Observer>,
    latest: Option<Value>,
    closed: bool,
}

/// Observers of one monitored tool.
///
/// Lives from the first attach to the last detach; once the last observer
/// leaves (or [`Observable::close`] is called) it is closed for good.
pub struct Observable {
    tool_id: String,
    set: Mutex<ObserverSet>,
    shutdown: CancellationToken,
}

impl Observable {
    pub fn new(tool_id: &str) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            set: Mutex::new(ObserverSet::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    fn lock(&self) -> MutexGuard<'_, ObserverSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observer. The latest known snapshot, if any, is replayed to it.
    pub fn attach(&self, observer: Observer) -> Attach {
        let mut set = self.lock();
        if set.closed {
            return Attach::Closed;
        }
        if set.observers.contains_key(&observer.id) {
            return Attach::AlreadyAttached;
        }

        if let Some(latest) = &set.latest {
            if observer.deliver(latest).is_err() {
                debug!("{}: replay to new observer failed", self.tool_id);
            }
        }
        debug!("{}: observer {} attached", self.tool_id, observer.id);
        set.observers.insert(observer.id, observer);
        Attach::Attached
    }

    /// Remove an observer. Removing the last one closes the observable.
    pub fn detach(&self, id: ObserverId) -> bool {
        let mut set = self.lock();
        if set.observers.remove(&id).is_none() {
            return false;
        }
        debug!("{}: observer {id} detached", self.tool_id);

        if set.observers.is_empty() && !set.closed {
            set.closed = true;
            drop(set);
            info!("{}: last observer left", self.tool_id);
            self.shutdown.cancel();
        }
        true
    }

    /// Push `data` to every attached observer
    pub fn notify(&self, data: Value) -> NotifyReport {
        let targets: Vec<Observer> = {
            let mut set = self.lock();
            if set.closed {
                return NotifyReport::default();
            }
            set.latest = Some(data.clone());
            set.observers.values().cloned().collect()
        };

        let mut report = NotifyReport::default();
        let mut gone = Vec::new();
        for observer in &targets {
            match observer.deliver(&data) {
                Ok(()) => report.delivered += 1,
                Err(Delivery::Full) => {
                    warn!(
                        "{}: observer {} is lagging, update dropped",
                        self.tool_id, observer.id
                    );
                    report.lagging += 1;
                }
                Err(Delivery::Disconnected) => {
                    report.disconnected += 1;
                    gone.push(observer.id);
                }
            }
        }

        for id in gone {
            self.detach(id);
        }
        report
    }

    /// Record the first snapshot of a loop without notifying anyone. It is
    /// replayed to observers that attach afterwards.
    pub fn seed(&self, snapshot: Value) {
        let mut set = self.lock();
        if !set.closed {
            set.latest = Some(snapshot);
        }
    }

    pub fn latest(&self) -> Option<Value> {
        self.lock().latest.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.lock().observers.contains_key(&id)
    }

    /// Close the observable, dropping every observer so their receivers end
    pub fn close(&self) {
        let mut set = self.lock();
        if set.closed {
            return;
        }
        set.closed = true;
        set.observers.clear();
        drop(set);
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves once the observable has closed
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}
