//! Courier status text to `OrderStatus`.

use tracing::warn;

use crate::types::{OrderStatus, TimelineEvent};

/// Checked first: any hit means the parcel reached the recipient.
const DELIVERED_KEYWORDS: &[&str] = &[
    "已签收",
    "签收",
    "已代收",
    "取出",
    "包裹已从代收点取出",
    "包裹已送至",
];

const RETURNED_KEYWORDS: &[&str] = &["已退回", "退回"];

const IN_TRANSIT_KEYWORDS: &[&str] = &[
    "运输中",
    "运输",
    "派件",
    "派送",
    "揽收",
    "已揽收",
    "已发出",
    "发出",
    "已到达",
    "到达",
    "正在派送",
];

const PENDING_KEYWORDS: &[&str] = &["无物流", "待查询"];

const ABNORMAL_KEYWORD: &str = "异常";

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(&n.to_lowercase()))
}

/// Map raw courier status text onto the closed status enum.
///
/// Precedence is delivered, returned, in transit, pending. Unknown text
/// defaults to `InTransit` with a warning; this never fails.
pub fn normalize_status(raw: &str) -> OrderStatus {
    let text = raw.trim().to_lowercase();

    if contains_any(&text, DELIVERED_KEYWORDS) {
        OrderStatus::Delivered
    } else if contains_any(&text, RETURNED_KEYWORDS) {
        OrderStatus::Returned
    } else if contains_any(&text, IN_TRANSIT_KEYWORDS) {
        OrderStatus::InTransit
    } else if contains_any(&text, PENDING_KEYWORDS) {
        OrderStatus::Pending
    } else {
        warn!(raw_status = raw, "Unrecognized courier status, defaulting to IN_TRANSIT");
        OrderStatus::InTransit
    }
}

/// True if the text carries any delivered keyword.
pub fn mentions_delivery(text: &str) -> bool {
    contains_any(&text.to_lowercase(), DELIVERED_KEYWORDS)
}

/// Status for a record, using the parsed timeline as a secondary delivered signal.
pub fn resolve_status(raw_status: &str, timeline: &[TimelineEvent]) -> OrderStatus {
    if mentions_delivery(raw_status) || timeline.iter().any(|e| mentions_delivery(&e.description)) {
        return OrderStatus::Delivered;
    }
    normalize_status(raw_status)
}

/// True when the courier flags the shipment as abnormal.
pub fn is_abnormal(raw_status: &str) -> bool {
    raw_status.contains(ABNORMAL_KEYWORD)
}
