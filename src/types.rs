//! Core order types shared by the sync engine.
//!
//! The order store owns these records; the engine only reads them and
//! proposes updated copies through `OrderStore::save`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between a tracking number and its phone-tail disambiguator.
pub const PHONE_TAIL_SEPARATOR: &str = "||";

/// Type-safe order identifier (store-assigned).
///
/// # Example
///
/// ```
/// use shipsync::types::OrderId;
///
/// let id = OrderId::new("ord-42");
/// assert_eq!(id.as_str(), "ord-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new OrderId from any string-like type.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        debug_assert!(!s.is_empty(), "OrderId cannot be empty");
        if s.is_empty() {
            tracing::warn!("Creating OrderId with empty string - merges keyed on it will collide");
        }
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Shipment lifecycle as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// No courier data yet
    #[default]
    Pending,
    /// Picked up, moving or out for delivery
    InTransit,
    /// Signed for or collected
    Delivered,
    /// Sent back to the shipper
    Returned,
}

impl OrderStatus {
    /// Returns true once the courier reports a final outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Returned)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InTransit => write!(f, "IN_TRANSIT"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Returned => write!(f, "RETURNED"),
        }
    }
}

/// Derived attention flag for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningStatus {
    #[default]
    None,
    /// Shipment has not moved for longer than the configured threshold
    DelayShipment,
    /// Courier reported an exception while in transit
    TransitAbnormal,
}

impl std::fmt::Display for WarningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::DelayShipment => write!(f, "DELAY_SHIPMENT"),
            Self::TransitAbnormal => write!(f, "TRANSIT_ABNORMAL"),
        }
    }
}

/// One entry in an order's tracking history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimelineEvent {
    /// Courier-reported time, kept verbatim (formats vary per carrier)
    pub timestamp: String,
    /// Location if the courier reported one separately
    #[serde(default)]
    pub location: String,
    pub description: String,
}

impl TimelineEvent {
    pub fn new(timestamp: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            location: String::new(),
            description: description.into(),
        }
    }
}

/// A shipment order as held by the order store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Carrier-assigned tracking number, as entered by staff
    pub tracking_number: String,
    /// Explicit carrier code; takes precedence over recognition
    #[serde(default)]
    pub carrier_code: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub warning_status: WarningStatus,
    /// Recipient phone, used to disambiguate carriers that require it
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a fresh pending order.
    #[must_use]
    pub fn new(id: impl Into<OrderId>, tracking_number: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracking_number: tracking_number.into(),
            carrier_code: None,
            status: OrderStatus::Pending,
            warning_status: WarningStatus::None,
            phone: None,
            timeline: Vec::new(),
            archived: false,
            created_at: Utc::now(),
            last_synced_at: None,
        }
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn with_carrier(mut self, carrier_code: impl Into<String>) -> Self {
        self.carrier_code = Some(carrier_code.into());
        self
    }

    /// Tracking number trimmed and uppercased, the form remote records use.
    pub fn normalized_tracking_number(&self) -> String {
        self.tracking_number.trim().to_uppercase()
    }

    /// Last four characters of the phone, if a phone is on file.
    pub fn phone_tail(&self) -> Option<String> {
        self.phone.as_deref().and_then(phone_tail)
    }

    /// Tracking number suffixed with `||` and the phone tail (or `default_tail`).
    pub fn disambiguated_key(&self, default_tail: &str) -> String {
        let tail = self.phone_tail().unwrap_or_else(|| default_tail.to_string());
        format!(
            "{}{}{}",
            self.normalized_tracking_number(),
            PHONE_TAIL_SEPARATOR,
            tail
        )
    }
}

/// Last four characters of a phone number, ignoring surrounding whitespace.
pub fn phone_tail(phone: &str) -> Option<String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return None;
    }
    let chars: Vec<char> = phone.chars().collect();
    let start = chars.len().saturating_sub(4);
    Some(chars[start..].iter().collect())
}

/// Strip a `||tail` suffix from a match key.
pub fn strip_phone_tail(key: &str) -> &str {
    match key.find(PHONE_TAIL_SEPARATOR) {
        Some(idx) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_tail() {
        assert_eq!(phone_tail("13800005678").as_deref(), Some("5678"));
        assert_eq!(phone_tail(" 123 ").as_deref(), Some("123"));
        assert_eq!(phone_tail("   "), None);
    }

    #[test]
    fn test_disambiguated_key_uses_default_tail() {
        let order = Order::new("1", " sf1 ");
        assert_eq!(order.disambiguated_key("1234"), "SF1||1234");

        let order = order.with_phone("13800005678");
        assert_eq!(order.disambiguated_key("1234"), "SF1||5678");
    }

    #[test]
    fn test_strip_phone_tail() {
        assert_eq!(strip_phone_tail("SF1||5678"), "SF1");
        assert_eq!(strip_phone_tail("SF1"), "SF1");
    }

    #[test]
    fn test_order_status_serde_names() {
        let json = serde_json::to_string(&OrderStatus::InTransit).unwrap();
        assert_eq!(json, "\"IN_TRANSIT\"");
        let parsed: WarningStatus = serde_json::from_str("\"TRANSIT_ABNORMAL\"").unwrap();
        assert_eq!(parsed, WarningStatus::TransitAbnormal);
    }
}
