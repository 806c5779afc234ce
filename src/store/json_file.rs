//! File-backed order store.
//!
//! Orders live in a single JSON array on disk. Every save rewrites the
//! file with write-to-temp, fsync, rename so a crash leaves either the old
//! or the new file, never a partial one. The in-memory copy changes only
//! after the file write succeeds; `save_many` writes a whole batch at once.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{InMemoryOrderStore, OrderFilter, OrderStore};
use crate::error::StoreError;
use crate::types::{Order, OrderId};

pub struct JsonFileOrderStore {
    path: PathBuf,
    cache: InMemoryOrderStore,
    /// Serializes file rewrites
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileOrderStore {
    /// Open the store at `path`. A missing file starts empty.
    ///
    /// # Errors
    /// Returns `StoreError` if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let orders: Vec<Order> = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Order file not found, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), count = orders.len(), "Order store loaded");

        Ok(Self {
            path,
            cache: InMemoryOrderStore::with_orders(orders),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the cache plus `orders` to disk, then apply them to the cache.
    async fn persist(&self, orders: &[Order]) -> Result<(), StoreError> {
        if orders.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        let mut snapshot: BTreeMap<OrderId, Order> = self
            .cache
            .all()
            .await
            .into_iter()
            .map(|o| (o.id.clone(), o))
            .collect();
        for order in orders {
            snapshot.insert(order.id.clone(), order.clone());
        }
        let snapshot: Vec<Order> = snapshot.into_values().collect();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &snapshot))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        self.cache.save_many(orders).await
    }
}

fn write_atomically(path: &Path, orders: &[Order]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(orders)?;
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[async_trait]
impl OrderStore for JsonFileOrderStore {
    async fn get(&self, id: &OrderId) -> Result<Order, StoreError> {
        self.cache.get(id).await
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.cache.list(filter).await
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        self.persist(std::slice::from_ref(order)).await
    }

    async fn save_many(&self, orders: &[Order]) -> Result<(), StoreError> {
        self.persist(orders).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;

    #[tokio::test]
    async fn test_save_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");

        let store = JsonFileOrderStore::open(&path).unwrap();
        let mut order = Order::new("ord-1", "SF1234567890").with_phone("13800005678");
        order.status = OrderStatus::InTransit;
        store.save(&order).await.unwrap();

        let reopened = JsonFileOrderStore::open(&path).unwrap();
        let loaded = reopened.get(&OrderId::new("ord-1")).await.unwrap();
        assert_eq!(loaded, order);
        assert!(!dir.path().join("orders.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist, so the temp file cannot be created
        let path = dir.path().join("missing").join("orders.json");

        let store = JsonFileOrderStore::open(&path).unwrap();
        let order = Order::new("ord-1", "YT1234567890");
        assert!(matches!(store.save(&order).await, Err(StoreError::Io(_))));
        assert!(matches!(
            store.get(&OrderId::new("ord-1")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.save_many(&[order]).await,
            Err(StoreError::Io(_))
        ));
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_many_writes_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");

        let store = JsonFileOrderStore::open(&path).unwrap();
        store.save(&Order::new("a", "YT1234567890")).await.unwrap();

        let mut a = Order::new("a", "YT1234567890");
        a.status = OrderStatus::Delivered;
        let batch = vec![a.clone(), Order::new("b", "ZT1234567890"), Order::new("c", "SF1")];
        store.save_many(&batch).await.unwrap();

        let reopened = JsonFileOrderStore::open(&path).unwrap();
        assert_eq!(reopened.list_active().await.unwrap().len(), 3);
        assert_eq!(reopened.get(&OrderId::new("a")).await.unwrap(), a);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileOrderStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
