//! In-memory order store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{OrderFilter, OrderStore};
use crate::error::StoreError;
use crate::types::{Order, OrderId};

/// Thread-safe in-memory store keyed by order id.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<BTreeMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `orders`.
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let map = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        Self {
            orders: Arc::new(RwLock::new(map)),
        }
    }

    /// Snapshot of every order, archived included.
    pub async fn all(&self) -> Vec<Order> {
        self.orders.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, id: &OrderId) -> Result<Order, StoreError> {
        self.orders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders.values().filter(|o| filter.matches(o)).cloned().collect())
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.clone(), order.clone());
        debug!(order_id = %order.id, status = %order.status, "Order saved");
        Ok(())
    }

    async fn save_many(&self, batch: &[Order]) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        for order in batch {
            orders.insert(order.id.clone(), order.clone());
        }
        debug!(count = batch.len(), "Orders saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_list_active() {
        let store = InMemoryOrderStore::new();
        let mut archived = Order::new("2", "YT1234567890");
        archived.archived = true;

        store.save(&Order::new("1", "SF1")).await.unwrap();
        store.save(&archived).await.unwrap();

        assert_eq!(store.len().await, 2);
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.as_str(), "1");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryOrderStore::new();
        let err = store.get(&OrderId::new("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_by_tracking_number_strips_tail() {
        let store = InMemoryOrderStore::with_orders(vec![Order::new("1", "sf1")]);
        let found = store.find_by_tracking_number("SF1||5678").await.unwrap();
        assert_eq!(found.map(|o| o.id), Some(OrderId::new("1")));
        assert!(store.find_by_tracking_number("SF2").await.unwrap().is_none());
    }
}
