//! The three-scope `ContextStore`: global, flow, and node-scoped key/value entries. Only the
//! global scope is persisted, debounced over a 500 ms quiescent window, following the same
//! in-memory-cache-plus-write-through shape this workspace already uses for its file-backed
//! memory store, adapted here to debounce instead of writing through on every call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tagflow_core::{ContextScope, EngineResult, InternalTagValue, Quality, ScopedKey, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct ContextStore {
    path: PathBuf,
    entries: Arc<RwLock<HashMap<String, InternalTagValue>>>,
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ContextStore {
    /// Loads persisted global-scope entries from `path`. An unreadable or corrupt file starts an
    /// empty store with a warning rather than failing startup.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_global_entries(&path).await;

        let store = Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
            dirty: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        };
        store.spawn_debounced_flusher();
        store
    }

    fn spawn_debounced_flusher(&self) {
        let entries = self.entries.clone();
        let dirty = self.dirty.clone();
        let notify = self.notify.clone();
        let path = self.path.clone();

        tokio::spawn(async move {
            loop {
                notify.notified().await;
                tokio::time::sleep(DEBOUNCE).await;
                if dirty.swap(false, Ordering::AcqRel) {
                    if let Err(e) = persist_global(&path, &entries).await {
                        warn!(error = %e, "failed to persist global context scope");
                    }
                }
            }
        });
    }

    pub async fn set(&self, scope: ContextScope, key: ScopedKey, value: Value) {
        let entry = InternalTagValue {
            scope,
            path: key.as_str().to_string(),
            value,
            quality: Quality::Good,
            timestamp: Utc::now(),
        };
        self.entries.write().await.insert(key.as_str().to_string(), entry);
        if scope == ContextScope::Global {
            self.dirty.store(true, Ordering::Release);
            self.notify.notify_one();
        }
    }

    pub async fn get(&self, key: &ScopedKey) -> Option<Value> {
        self.entries.read().await.get(key.as_str()).map(|e| e.value.clone())
    }

    /// Drops every flow- and node-scoped entry owned by `flow_id`, matching the spec's rule that
    /// those entries are cleared when the owning flow disappears from config.
    pub async fn clear_flow(&self, flow_id: &str) {
        let flow_prefix = format!("flow:{flow_id}:");
        let node_prefix = format!("node:{flow_id}:");
        let mut entries = self.entries.write().await;
        entries.retain(|k, _| !k.starts_with(&flow_prefix) && !k.starts_with(&node_prefix));
    }

    /// Final synchronous flush, called on shutdown.
    pub async fn flush(&self) -> EngineResult<()> {
        persist_global(&self.path, &self.entries).await
    }
}

async fn load_global_entries(path: &PathBuf) -> HashMap<String, InternalTagValue> {
    if !path.exists() {
        return HashMap::new();
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<InternalTagValue>>(&bytes) {
            Ok(values) => values.into_iter().map(|v| (v.path.clone(), v)).collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt context file, starting empty");
                HashMap::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable context file, starting empty");
            HashMap::new()
        }
    }
}

async fn persist_global(
    path: &PathBuf,
    entries: &Arc<RwLock<HashMap<String, InternalTagValue>>>,
) -> EngineResult<()> {
    let guard = entries.read().await;
    let global: Vec<&InternalTagValue> =
        guard.values().filter(|e| e.scope == ContextScope::Global).collect();
    let body = serde_json::to_vec_pretty(&global)?;
    drop(guard);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;
    debug!(path = %path.display(), "persisted global context scope");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_write_wins_and_is_readable_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::load(dir.path().join("internal-tags.json")).await;
        let key = ScopedKey::global("a");
        store.set(ContextScope::Global, key.clone(), Value::Number(1.0)).await;
        store.set(ContextScope::Global, key.clone(), Value::Number(2.0)).await;
        assert_eq!(store.get(&key).await, Some(Value::Number(2.0)));
    }

    #[tokio::test]
    async fn flush_persists_only_global_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("internal-tags.json");
        let store = ContextStore::load(&path).await;
        store.set(ContextScope::Global, ScopedKey::global("g"), Value::Number(1.0)).await;
        store.set(ContextScope::Flow, ScopedKey::flow("f1", "x"), Value::Number(9.0)).await;
        store.flush().await.unwrap();

        let reloaded = ContextStore::load(&path).await;
        assert_eq!(reloaded.get(&ScopedKey::global("g")).await, Some(Value::Number(1.0)));
        assert_eq!(reloaded.get(&ScopedKey::flow("f1", "x")).await, None);
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("internal-tags.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = ContextStore::load(&path).await;
        assert_eq!(store.get(&ScopedKey::global("g")).await, None);
    }
}
