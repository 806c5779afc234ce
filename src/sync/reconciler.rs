//! Merge remote tracking records onto orders.
//!
//! A record is applied only when it identifies exactly one order. Keys are
//! compared in two tiers:
//!
//! 1. **Exact**: the record key equals the order's tracking number, or the
//!    tracking number with the order's own `||tail` appended.
//! 2. **Stripped**: the record key equals the tracking number once `||tail`
//!    is stripped from either side. Orders whose known phone tail
//!    contradicts the record's tail are excluded.
//!
//! The stripped tier is consulted only when the exact tier is empty.
//! Zero or multiple candidates skip the record.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::metrics::MERGES_TOTAL;
use crate::normalize::{is_abnormal, parse_timeline, resolve_status};
use crate::provider::RemoteTrackingRecord;
use crate::types::{phone_tail, strip_phone_tail, Order, OrderId, OrderStatus, WarningStatus, PHONE_TAIL_SEPARATOR};

/// Which order (if any) a record identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordMatch {
    Unique(OrderId),
    NoMatch,
    Ambiguous(Vec<OrderId>),
}

/// Result of merging one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Status, warning or timeline changed
    Applied(OrderId),
    /// Matched, nothing but the sync stamp changed
    Unchanged(OrderId),
    Unmatched,
    Ambiguous(Vec<OrderId>),
}

impl MergeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Unchanged(_) => "unchanged",
            Self::Unmatched => "unmatched",
            Self::Ambiguous(_) => "ambiguous",
        }
    }
}

/// Applies normalized remote data to orders.
#[derive(Debug, Clone)]
pub struct Reconciler {
    default_phone_tail: String,
    delay_threshold: Duration,
}

impl Reconciler {
    pub fn new(default_phone_tail: impl Into<String>, delay_threshold_hours: i64) -> Self {
        Self {
            default_phone_tail: default_phone_tail.into(),
            delay_threshold: Duration::hours(delay_threshold_hours),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.default_phone_tail.clone(), config.delay_threshold_hours)
    }

    /// Find the order `record` refers to among `orders`.
    pub fn match_record(&self, record: &RemoteTrackingRecord, orders: &[Order]) -> RecordMatch {
        let key = record.tracking_number.trim().to_uppercase();
        if key.is_empty() {
            return RecordMatch::NoMatch;
        }

        let exact: Vec<&Order> = orders.iter().filter(|o| self.matches_exactly(o, &key)).collect();
        let candidates = if exact.is_empty() {
            let record_tail = key
                .split_once(PHONE_TAIL_SEPARATOR)
                .map(|(_, tail)| tail.to_string());
            let stripped = strip_phone_tail(&key);
            orders
                .iter()
                .filter(|o| o.normalized_tracking_number().as_str() == stripped || strip_phone_tail(&o.normalized_tracking_number()) == stripped)
                .filter(|o| match (&record_tail, o.phone_tail()) {
                    (Some(rt), Some(ot)) => rt.eq_ignore_ascii_case(&ot),
                    _ => true,
                })
                .collect()
        } else {
            exact
        };

        let mut ids: Vec<OrderId> = candidates.into_iter().map(|o| o.id.clone()).collect();
        ids.dedup();
        match ids.len() {
            0 => RecordMatch::NoMatch,
            1 => RecordMatch::Unique(ids.remove(0)),
            _ => RecordMatch::Ambiguous(ids),
        }
    }

    fn matches_exactly(&self, order: &Order, key: &str) -> bool {
        let number = order.normalized_tracking_number();
        if number == key {
            return true;
        }
        let own_key = match order.phone.as_deref().and_then(phone_tail) {
            Some(tail) => format!("{}{}{}", number, PHONE_TAIL_SEPARATOR, tail.to_uppercase()),
            None => order.disambiguated_key(&self.default_phone_tail).to_uppercase(),
        };
        own_key == key
    }

    /// Apply `record` to `order`, stamping `now` as the sync time.
    ///
    /// Returns the updated order and whether anything besides the stamp changed.
    pub fn apply(&self, order: &Order, record: &RemoteTrackingRecord, now: DateTime<Utc>) -> (Order, bool) {
        let mut updated = order.clone();

        let timeline = parse_timeline(&record.raw_history_text);
        updated.status = resolve_status(&record.raw_status_text, &timeline);
        updated.warning_status = self.warning_for(order, updated.status, &record.raw_status_text, now);
        if !timeline.is_empty() {
            updated.timeline = timeline;
        }
        updated.last_synced_at = Some(now);

        let changed = updated.status != order.status
            || updated.warning_status != order.warning_status
            || updated.timeline != order.timeline;
        (updated, changed)
    }

    fn warning_for(&self, order: &Order, status: OrderStatus, raw_status: &str, now: DateTime<Utc>) -> WarningStatus {
        if is_abnormal(raw_status) {
            return WarningStatus::TransitAbnormal;
        }
        match status {
            OrderStatus::Delivered | OrderStatus::Returned | OrderStatus::InTransit => WarningStatus::None,
            OrderStatus::Pending if now - order.created_at > self.delay_threshold => WarningStatus::DelayShipment,
            OrderStatus::Pending => order.warning_status,
        }
    }

    /// Match and apply one record against a candidate set.
    ///
    /// The caller persists the returned order when the outcome is
    /// `Applied` or `Unchanged`.
    pub fn merge(&self, record: &RemoteTrackingRecord, orders: &[Order], now: DateTime<Utc>) -> (MergeOutcome, Option<Order>) {
        let result = match self.match_record(record, orders) {
            RecordMatch::Unique(id) => {
                // Unique ids always come from `orders`
                let order = orders.iter().find(|o| o.id == id);
                match order {
                    Some(order) => {
                        let (updated, changed) = self.apply(order, record, now);
                        if changed {
                            info!(
                                order_id = %id,
                                status = %updated.status,
                                warning = %updated.warning_status,
                                events = updated.timeline.len(),
                                "Order updated from tracking record"
                            );
                            (MergeOutcome::Applied(id), Some(updated))
                        } else {
                            debug!(order_id = %id, "Tracking record matched, no change");
                            (MergeOutcome::Unchanged(id), Some(updated))
                        }
                    }
                    None => (MergeOutcome::Unmatched, None),
                }
            }
            RecordMatch::NoMatch => {
                warn!(tracking_number = %record.tracking_number, "No order matches tracking record, skipping");
                (MergeOutcome::Unmatched, None)
            }
            RecordMatch::Ambiguous(ids) => {
                warn!(
                    tracking_number = %record.tracking_number,
                    candidates = ?ids,
                    "Tracking record matches several orders, skipping"
                );
                (MergeOutcome::Ambiguous(ids), None)
            }
        };

        MERGES_TOTAL.with_label_values(&[result.0.label()]).inc();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimelineEvent;

    fn record(key: &str, status: &str, history: &str) -> RemoteTrackingRecord {
        RemoteTrackingRecord {
            tracking_number: key.to_string(),
            raw_status_text: status.to_string(),
            raw_history_text: history.to_string(),
            ..Default::default()
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new("1234", 72)
    }

    #[test]
    fn test_tail_key_matches_only_owning_order() {
        let orders = vec![
            Order::new("a", "SF1").with_phone("13800005678"),
            Order::new("b", "SF1").with_phone("13900009999"),
            Order::new("c", "SF2").with_phone("13800005678"),
        ];
        let m = reconciler().match_record(&record("SF1||5678", "", ""), &orders);
        assert_eq!(m, RecordMatch::Unique(OrderId::from("a")));
    }

    #[test]
    fn test_match_tiers() {
        let r = reconciler();
        let orders = vec![Order::new("a", "yt0001")];

        // Plain key
        assert_eq!(r.match_record(&record("YT0001", "", ""), &orders), RecordMatch::Unique("a".into()));
        // Record carries a tail the order never had
        assert_eq!(r.match_record(&record("YT0001||7777", "", ""), &orders), RecordMatch::Unique("a".into()));
        // Default tail for phoneless orders
        assert_eq!(r.match_record(&record("YT0001||1234", "", ""), &orders), RecordMatch::Unique("a".into()));

        assert_eq!(r.match_record(&record("YT0002", "", ""), &orders), RecordMatch::NoMatch);
        assert_eq!(r.match_record(&record("", "", ""), &orders), RecordMatch::NoMatch);
    }

    #[test]
    fn test_contradicting_tail_is_not_a_match() {
        let orders = vec![Order::new("a", "SF1").with_phone("13800005678")];
        let m = reconciler().match_record(&record("SF1||0000", "", ""), &orders);
        assert_eq!(m, RecordMatch::NoMatch);
    }

    #[test]
    fn test_shared_key_is_ambiguous() {
        let orders = vec![Order::new("a", "YT0001"), Order::new("b", "YT0001")];
        let (outcome, updated) = reconciler().merge(&record("YT0001", "已签收", ""), &orders, Utc::now());
        assert_eq!(outcome, MergeOutcome::Ambiguous(vec!["a".into(), "b".into()]));
        assert!(updated.is_none());
    }

    #[test]
    fn test_apply_delivered_replaces_timeline() {
        let mut order = Order::new("a", "SF1").with_phone("13800005678");
        order.timeline = vec![TimelineEvent::new("old", "揽收")];
        let now = Utc::now();

        let (updated, changed) = reconciler().apply(
            &order,
            &record("SF1||5678", "已签收", "<i>2024-01-01 10:00</i> | 已签收"),
            now,
        );

        assert!(changed);
        assert_eq!(updated.status, OrderStatus::Delivered);
        assert_eq!(updated.warning_status, WarningStatus::None);
        assert_eq!(updated.timeline, vec![TimelineEvent::new("2024-01-01 10:00", "已签收")]);
        assert_eq!(updated.last_synced_at, Some(now));
    }

    #[test]
    fn test_omitted_history_keeps_existing_timeline() {
        let mut order = Order::new("a", "YT0001");
        order.timeline = vec![TimelineEvent::new("t", "运输中")];
        let (updated, _) = reconciler().apply(&order, &record("YT0001", "运输中", "内容过长,已省略"), Utc::now());
        assert_eq!(updated.timeline, order.timeline);
    }

    #[test]
    fn test_warning_rules() {
        let r = reconciler();
        let now = Utc::now();

        let order = Order::new("a", "YT0001");
        let (updated, _) = r.apply(&order, &record("YT0001", "运输异常", ""), now);
        assert_eq!(updated.warning_status, WarningStatus::TransitAbnormal);

        let mut stale = Order::new("b", "YT0002");
        stale.created_at = now - Duration::hours(100);
        let (updated, _) = r.apply(&stale, &record("YT0002", "待查询", ""), now);
        assert_eq!(updated.status, OrderStatus::Pending);
        assert_eq!(updated.warning_status, WarningStatus::DelayShipment);

        let fresh = Order::new("c", "YT0003");
        let (updated, _) = r.apply(&fresh, &record("YT0003", "待查询", ""), now);
        assert_eq!(updated.warning_status, WarningStatus::None);

        let mut flagged = Order::new("d", "YT0004");
        flagged.warning_status = WarningStatus::TransitAbnormal;
        let (updated, _) = r.apply(&flagged, &record("YT0004", "已签收", ""), now);
        assert_eq!(updated.warning_status, WarningStatus::None);
    }

    #[test]
    fn test_second_merge_is_unchanged() {
        let r = reconciler();
        let rec = record("YT0001", "运输中", "2024-01-01 08:00|已揽收\n2024-01-02 09:00|运输中");
        let order = Order::new("a", "YT0001");

        let (first, updated) = r.merge(&rec, std::slice::from_ref(&order), Utc::now());
        assert_eq!(first, MergeOutcome::Applied("a".into()));
        let updated = updated.unwrap();

        let (second, again) = r.merge(&rec, std::slice::from_ref(&updated), Utc::now());
        assert_eq!(second, MergeOutcome::Unchanged("a".into()));
        let again = again.unwrap();
        assert_eq!(again.status, updated.status);
        assert_eq!(again.timeline, updated.timeline);
    }
}
