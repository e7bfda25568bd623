//! Concurrent keyed file store
//!
//! Small JSON documents addressed by key (`tool_state`, `results/wifi-details`)
//! and kept under a single root directory. Operations on one key run one at a
//! time; different keys proceed independently. Every write goes to a temporary
//! sibling first and is renamed into place, so readers only ever see a complete
//! document.
//!
//! Per-key locks are created on demand and dropped from the table as soon as
//! nobody holds them, so the table stays proportional to in-flight work rather
//! than to every key ever touched.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ToolboxError};

/// A stored document: always a JSON object at the top level
pub type Document = Map<String, Value>;

pub struct FileStore {
    root: PathBuf,
    locks: DashMap<String, Weak<Mutex<()>>>,
}

/// Drops a key's table entry once no operation holds or awaits its lock.
/// Runs on every exit path, including failure and cancellation.
struct Reaper<'a> {
    store: &'a FileStore,
    key: &'a str,
}

impl Drop for Reaper<'_> {
    fn drop(&mut self) {
        self.store
            .locks
            .remove_if(self.key, |_, weak| weak.strong_count() == 0);
    }
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its file under the store root
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') || key.contains('\\') {
            return Err(ToolboxError::InvalidKey(key.to_string()));
        }

        let segments: Vec<&str> = key.split('/').collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(ToolboxError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        if let Some((last, parents)) = segments.split_last() {
            path.extend(parents);
            path.push(format!("{last}.json"));
        }
        Ok(path)
    }

    /// Read the whole document stored under `key`
    pub async fn read(&self, key: &str) -> Result<Document> {
        self.with_key(key, |path| async move { load(&path).await })
            .await
    }

    /// Replace the document stored under `key`
    pub async fn write(&self, key: &str, document: Document) -> Result<()> {
        self.with_key(key, |path| async move { persist(&path, &document).await })
            .await
    }

    /// Shallow-merge `partial` over the stored document and write it back.
    ///
    /// A missing document is treated as empty. Returns the merged result.
    pub async fn update(&self, key: &str, partial: Document) -> Result<Document> {
        self.with_key(key, |path| async move {
            let mut current = match load(&path).await {
                Ok(doc) => doc,
                Err(e) if e.is_missing_file() => Document::new(),
                Err(e) => return Err(e),
            };
            for (k, v) in partial {
                current.insert(k, v);
            }
            persist(&path, &current).await?;
            Ok(current)
        })
        .await
    }

    /// Number of keys whose lock is currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }

    async fn with_key<T, F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = self.path_for(key)?;
        // declared before the lock so it drops after it
        let _reaper = Reaper { store: self, key };
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        op(path).await
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut entry = self.locks.entry(key.to_string()).or_default();
        if let Some(lock) = entry.upgrade() {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        *entry = Arc::downgrade(&lock);
        lock
    }
}

async fn load(path: &Path) -> Result<Document> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ToolboxError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&bytes).map_err(|source| ToolboxError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn persist(path: &Path, document: &Document) -> Result<()> {
    let io_err = |source| ToolboxError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let bytes = serde_json::to_vec_pretty(document).map_err(|source| ToolboxError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!("Failed to move {} into place: {e}", path.display());
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn setup() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileStore::new(dir.path()), dir)
    }

    #[test]
    fn test_key_resolution() {
        let store = FileStore::new("/data");
        assert_eq!(
            store.path_for("tool_state").unwrap(),
            PathBuf::from("/data/tool_state.json")
        );
        assert_eq!(
            store.path_for("results/wifi-details").unwrap(),
            PathBuf::from("/data/results/wifi-details.json")
        );
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let store = FileStore::new("/data");
        for key in ["", "/etc/passwd", "../up", "a//b", "a/./b", "trailing/", "a\\b"] {
            assert!(
                matches!(store.path_for(key), Err(ToolboxError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, _dir) = setup();
        store
            .write("results/disk", doc(json!({"capturedAt": "now", "data": {"used": 3}})))
            .await
            .unwrap();

        let back = store.read("results/disk").await.unwrap();
        assert_eq!(back["data"]["used"], 3);
    }

    #[tokio::test]
    async fn test_read_missing_is_io_error() {
        let (store, _dir) = setup();
        let err = store.read("absent").await.unwrap_err();
        assert!(err.is_missing_file());
    }

    #[tokio::test]
    async fn test_read_malformed_is_parse_error() {
        let (store, dir) = setup();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        let err = store.read("broken").await.unwrap_err();
        assert!(matches!(err, ToolboxError::Parse { .. }));

        std::fs::write(dir.path().join("array.json"), b"[1, 2]").unwrap();
        let err = store.read("array").await.unwrap_err();
        assert!(matches!(err, ToolboxError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_over_existing() {
        let (store, _dir) = setup();
        store.write("doc", doc(json!({"a": 1, "b": 1}))).await.unwrap();

        store.update("doc", doc(json!({"b": 2}))).await.unwrap();

        let back = store.read("doc").await.unwrap();
        assert_eq!(Value::Object(back), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_update_missing_starts_empty() {
        let (store, _dir) = setup();
        let merged = store.update("fresh", doc(json!({"x": true}))).await.unwrap();
        assert_eq!(Value::Object(merged), json!({"x": true}));
    }

    #[tokio::test]
    async fn test_update_over_malformed_fails_and_keeps_file() {
        let (store, dir) = setup();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{oops").unwrap();

        assert!(store.update("broken", doc(json!({"x": 1}))).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"{oops");
        // the key is usable again after a failure
        store.write("broken", doc(json!({"x": 1}))).await.unwrap();
        assert_eq!(store.read("broken").await.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (store, dir) = setup();
        for i in 0..5 {
            store.update("doc", doc(json!({ format!("k{i}"): i }))).await.unwrap();
        }
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_both_keys() {
        for _ in 0..20 {
            let (store, _dir) = setup();
            let store = Arc::new(store);

            let a = {
                let store = store.clone();
                tokio::spawn(async move { store.update("shared", doc(json!({"x": 1}))).await })
            };
            let b = {
                let store = store.clone();
                tokio::spawn(async move { store.update("shared", doc(json!({"y": 2}))).await })
            };
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();

            let back = store.read("shared").await.unwrap();
            assert_eq!(Value::Object(back), json!({"x": 1, "y": 2}));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_sections_never_overlap() {
        let (store, _dir) = setup();
        let store = Arc::new(store);
        let busy = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let busy = busy.clone();
            handles.push(tokio::spawn(async move {
                store
                    .with_key("shared", |_| async move {
                        assert!(!busy.swap(true, Ordering::SeqCst), "overlapping section");
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        busy.store(false, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_locks_are_reclaimed_when_idle() {
        let (store, _dir) = setup();
        for i in 0..50 {
            store
                .write(&format!("results/tool-{i}"), doc(json!({"i": i})))
                .await
                .unwrap();
        }
        assert_eq!(store.active_keys(), 0);

        let _ = store.read("missing").await;
        assert_eq!(store.active_keys(), 0);
    }
}
