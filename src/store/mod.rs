//! Order Store Collaborator
//!
//! The sync engine never owns orders. It reads them through [`OrderStore`]
//! and hands back updated copies via `save`. Two implementations ship with
//! the crate:
//!
//! - `InMemoryOrderStore` - tests and embedding
//! - `JsonFileOrderStore` - the CLI's file-backed store with atomic writes

mod json_file;
mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{strip_phone_tail, Order, OrderId, OrderStatus};

pub use json_file::JsonFileOrderStore;
pub use memory::InMemoryOrderStore;

/// Filter for [`OrderStore::list`].
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub include_archived: bool,
    pub status: Option<OrderStatus>,
    pub carrier_code: Option<String>,
}

impl OrderFilter {
    /// Non-archived orders in any status.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn matches(&self, order: &Order) -> bool {
        if order.archived && !self.include_archived {
            return false;
        }
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        if let Some(code) = &self.carrier_code {
            if !order
                .carrier_code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code))
            {
                return false;
            }
        }
        true
    }
}

/// Persistence interface consumed by the sync engine.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: &OrderId) -> Result<Order, StoreError>;

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Insert or replace an order by id.
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    /// Insert or replace several orders. Stores that persist should write
    /// them in one go.
    async fn save_many(&self, orders: &[Order]) -> Result<(), StoreError> {
        for order in orders {
            self.save(order).await?;
        }
        Ok(())
    }

    /// All non-archived orders.
    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        self.list(&OrderFilter::active()).await
    }

    /// Order whose tracking number equals `key` once any `||tail` is stripped.
    async fn find_by_tracking_number(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let wanted = strip_phone_tail(key.trim()).to_uppercase();
        let orders = self
            .list(&OrderFilter {
                include_archived: true,
                ..OrderFilter::default()
            })
            .await?;
        Ok(orders
            .into_iter()
            .find(|o| o.normalized_tracking_number() == wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let mut order = Order::new("1", "SF1").with_carrier("shunfeng");
        assert!(OrderFilter::active().matches(&order));

        let by_carrier = OrderFilter {
            carrier_code: Some("SHUNFENG".to_string()),
            ..OrderFilter::default()
        };
        assert!(by_carrier.matches(&order));

        let by_status = OrderFilter {
            status: Some(OrderStatus::Delivered),
            ..OrderFilter::default()
        };
        assert!(!by_status.matches(&order));

        order.archived = true;
        assert!(!OrderFilter::active().matches(&order));
    }
}
