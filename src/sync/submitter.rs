//! Batch task submission.
//!
//! Orders are grouped by resolved carrier, chunked to the provider's
//! per-call limit, and each chunk becomes one remote query task. A failed
//! create call is reported for its own chunk only. Records are matched
//! against the whole carrier group, so chunking never hides a duplicate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::carrier::{self, Carrier, RecognitionError};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::TASKS_CREATED;
use crate::provider::{self, CreateTaskRequest, TrackingProvider};
use crate::sync::task::SyncTask;
use crate::types::Order;

/// Orders for one carrier that fit into a single create-task call.
#[derive(Debug, Clone)]
pub struct SubBatch {
    pub carrier: Carrier,
    pub orders: Vec<Order>,
    /// Every planned order of this carrier, across all of its chunks
    pub candidates: Arc<[Order]>,
    /// Unique query keys in submission order
    pub keys: Vec<String>,
}

impl SubBatch {
    /// Comma-joined key list sent as `kddhs`.
    pub fn joined_keys(&self) -> String {
        self.keys.join(",")
    }

    /// Short label for logs and batch summaries.
    pub fn label(&self) -> String {
        format!("{} ({} orders)", self.carrier.code, self.orders.len())
    }
}

/// Result of grouping: runnable sub-batches plus orders no carrier claimed.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub batches: Vec<SubBatch>,
    pub unrecognized: Vec<(Order, RecognitionError)>,
}

/// Query key for an order under its carrier's wire rules.
pub fn query_key(order: &Order, carrier_code: &str, default_tail: &str) -> String {
    if carrier::requires_phone_tail(carrier_code) {
        order.disambiguated_key(default_tail)
    } else {
        order.normalized_tracking_number()
    }
}

/// Group orders by carrier and chunk each group to `config.batch_size`.
pub fn plan_batches(orders: &[Order], config: &SyncConfig) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut groups: BTreeMap<String, (Carrier, Vec<Order>)> = BTreeMap::new();

    for order in orders {
        match carrier::resolve(order.carrier_code.as_deref(), &order.tracking_number) {
            Ok(c) => groups
                .entry(c.code.to_string())
                .or_insert_with(|| (c, Vec::new()))
                .1
                .push(order.clone()),
            Err(e) => {
                warn!(order_id = %order.id, tracking_number = %order.tracking_number, error = %e, "Skipping order with unknown carrier");
                plan.unrecognized.push((order.clone(), e));
            }
        }
    }

    let chunk_size = config.batch_size.max(1);
    for (_, (carrier, group)) in groups {
        let candidates: Arc<[Order]> = Arc::from(group);
        for chunk in candidates.chunks(chunk_size) {
            let mut seen = BTreeSet::new();
            let keys = chunk
                .iter()
                .map(|o| query_key(o, &carrier.code, &config.default_phone_tail))
                .filter(|k| seen.insert(k.clone()))
                .collect();
            plan.batches.push(SubBatch {
                carrier: carrier.clone(),
                orders: chunk.to_vec(),
                candidates: candidates.clone(),
                keys,
            });
        }
    }

    plan
}

/// Creates remote query tasks for sub-batches.
#[derive(Clone)]
pub struct TaskSubmitter {
    provider: Arc<dyn TrackingProvider>,
}

impl TaskSubmitter {
    pub fn new(provider: Arc<dyn TrackingProvider>) -> Self {
        Self { provider }
    }

    /// Submit one sub-batch and return its freshly created task.
    ///
    /// # Errors
    /// `SyncError::TaskCreation` if the call fails or the response carries no
    /// usable task handle.
    #[instrument(skip(self, batch), fields(carrier = %batch.carrier.code, keys = batch.keys.len()))]
    pub async fn submit(&self, batch: &SubBatch) -> Result<SyncTask, SyncError> {
        let request = CreateTaskRequest {
            carrier_code: batch.carrier.code.to_string(),
            tracking_numbers: batch.joined_keys(),
            return_task_name: true,
        };

        let creation_error = |message: String| {
            TASKS_CREATED
                .with_label_values(&[&*batch.carrier.code, "failed"])
                .inc();
            warn!(carrier = %batch.carrier.code, error = %message, "Task creation failed");
            SyncError::TaskCreation {
                carrier: batch.carrier.code.to_string(),
                message,
            }
        };

        let response = self
            .provider
            .create_task(&request)
            .await
            .map_err(|e| creation_error(e.to_string()))?;
        let handle = provider::task_handle(&response).map_err(creation_error)?;

        TASKS_CREATED
            .with_label_values(&[&*batch.carrier.code, "created"])
            .inc();
        info!(carrier = %batch.carrier.code, task = %handle, keys = batch.keys.len(), "Remote task created");

        Ok(SyncTask::new(
            &*batch.carrier.code,
            handle,
            batch.keys.iter().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{ApiResponse, MockTrackingProvider};
    use crate::sync::task::SyncTaskState;
    use serde_json::json;

    fn orders_for(prefix: &str, n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| Order::new(format!("{}-{}", prefix, i), format!("{}{:010}", prefix, i)))
            .collect()
    }

    #[test]
    fn test_plan_groups_and_chunks() {
        let mut orders = orders_for("YT", 120);
        orders.extend(orders_for("ZT", 3));
        let plan = plan_batches(&orders, &SyncConfig::default());

        let sizes: Vec<(&str, usize)> = plan
            .batches
            .iter()
            .map(|b| (&*b.carrier.code, b.orders.len()))
            .collect();
        assert_eq!(
            sizes,
            vec![("yuantong", 50), ("yuantong", 50), ("yuantong", 20), ("zhongtong", 3)]
        );
        assert!(plan.unrecognized.is_empty());
        assert!(plan.batches[..3].iter().all(|b| b.candidates.len() == 120));
        assert_eq!(plan.batches[3].candidates.len(), 3);
    }

    #[test]
    fn test_plan_explicit_carrier_and_unrecognized() {
        let orders = vec![
            Order::new("a", "XX1").with_carrier("yunda"),
            Order::new("b", "XX2"),
        ];
        let plan = plan_batches(&orders, &SyncConfig::default());
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].carrier.code, "yunda");
        assert_eq!(plan.unrecognized.len(), 1);
        assert_eq!(plan.unrecognized[0].0.id.as_str(), "b");
    }

    #[test]
    fn test_shunfeng_keys_carry_phone_tail() {
        let orders = vec![
            Order::new("a", "SF1234567890").with_phone("13800005678"),
            Order::new("b", "sf999"),
            Order::new("c", "SF1234567890").with_phone("13900005678"),
        ];
        let plan = plan_batches(&orders, &SyncConfig::default());
        assert_eq!(plan.batches.len(), 1);
        // Duplicate key for "c" collapses, both orders stay in the batch
        assert_eq!(plan.batches[0].joined_keys(), "SF1234567890||5678,SF999||1234");
        assert_eq!(plan.batches[0].orders.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_creates_task() {
        let mut provider = MockTrackingProvider::new();
        provider
            .expect_create_task()
            .withf(|req| {
                req.carrier_code == "shunfeng"
                    && req.tracking_numbers == "SF1234567890||5678"
                    && req.return_task_name
            })
            .times(1)
            .returning(|_| Ok(serde_json::from_value::<ApiResponse>(json!({"code": 1, "msg": "task-abc"})).unwrap()));

        let orders = vec![Order::new("a", "SF1234567890").with_phone("13800005678")];
        let plan = plan_batches(&orders, &SyncConfig::default());
        let submitter = TaskSubmitter::new(Arc::new(provider));

        let task = submitter.submit(&plan.batches[0]).await.unwrap();
        assert_eq!(task.task_handle, "task-abc");
        assert_eq!(task.state(), SyncTaskState::Created);
        assert!(task.submitted_tracking_numbers.contains("SF1234567890||5678"));
    }

    #[tokio::test]
    async fn test_submit_passes_unknown_explicit_carrier_through() {
        let mut provider = MockTrackingProvider::new();
        provider
            .expect_create_task()
            .withf(|req| req.carrier_code == "huitongkuaidi" && req.tracking_numbers == "HT1234567890")
            .times(1)
            .returning(|_| Ok(serde_json::from_value::<ApiResponse>(json!({"code": 1, "msg": "task-ht"})).unwrap()));

        let orders = vec![Order::new("a", "HT1234567890")
            .with_carrier("huitongkuaidi")
            .with_phone("13800005678")];
        let plan = plan_batches(&orders, &SyncConfig::default());
        assert!(plan.unrecognized.is_empty());
        assert_eq!(plan.batches[0].carrier.code, "huitongkuaidi");

        let task = TaskSubmitter::new(Arc::new(provider))
            .submit(&plan.batches[0])
            .await
            .unwrap();
        assert_eq!(task.carrier_code, "huitongkuaidi");
    }

    #[tokio::test]
    async fn test_submit_failures_are_task_creation_errors() {
        let mut seq = mockall::Sequence::new();
        let mut provider = MockTrackingProvider::new();
        provider
            .expect_create_task()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(serde_json::from_value::<ApiResponse>(json!({"code": 0, "msg": "余额不足"})).unwrap()));
        provider
            .expect_create_task()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ProviderError::Transport("connection reset".to_string())));

        let plan = plan_batches(&orders_for("YT", 1), &SyncConfig::default());
        let submitter = TaskSubmitter::new(Arc::new(provider));

        for _ in 0..2 {
            let err = submitter.submit(&plan.batches[0]).await.unwrap_err();
            assert!(matches!(err, SyncError::TaskCreation { ref carrier, .. } if carrier == "yuantong"));
        }
    }
}
