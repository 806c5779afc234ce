//! Normalization of courier free text.
//!
//! - `status` - maps raw status strings onto [`OrderStatus`](crate::types::OrderStatus)
//! - `timeline` - parses semi-structured tracking history into events
//!
//! Nothing here fails: malformed input degrades to a best-effort result
//! and a log line.

pub mod status;
pub mod timeline;

pub use status::{is_abnormal, mentions_delivery, normalize_status, resolve_status};
pub use timeline::parse_timeline;
