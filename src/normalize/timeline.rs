//! Tracking history parsing.
//!
//! Accepted shapes, tried in order:
//! 1. JSON array of `{time, description}`-like objects
//! 2. `<i>TIME</i> | DESCRIPTION` lines
//! 3. plain `TIME|DESCRIPTION` lines
//!
//! Anything else (including the "too long, omitted" placeholder) yields an
//! empty timeline.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::TimelineEvent;

/// Placeholders the provider substitutes for oversized histories.
const OMITTED_MARKERS: &[&str] = &["内容过长", "已省略", "too long, omitted"];

const TIME_KEYS: &[&str] = &["time", "ftime", "timestamp", "datetime", "date"];
const DESCRIPTION_KEYS: &[&str] = &["description", "context", "desc", "content", "status"];
const LOCATION_KEYS: &[&str] = &["location", "area", "areaName"];

lazy_static! {
    static ref LINE_SEPARATOR: Regex = Regex::new(r"(?i)\r?\n|<br\s*/?>").expect("valid regex");
    static ref HTML_LINE: Regex =
        Regex::new(r"(?is)^\s*<i>(.*?)</i>\s*\|?\s*(.*?)\s*$").expect("valid regex");
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").expect("valid regex");
}

/// Parse raw history text into timeline events. Never fails.
pub fn parse_timeline(raw: &str) -> Vec<TimelineEvent> {
    let text = raw.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if OMITTED_MARKERS.iter().any(|m| text.contains(m)) {
        debug!("Tracking history omitted by provider");
        return Vec::new();
    }

    if text.starts_with('[') {
        return parse_json(text);
    }

    let lines: Vec<&str> = LINE_SEPARATOR
        .split(text)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let events = if text.contains("<i>") {
        lines.iter().filter_map(|l| parse_html_line(l)).collect::<Vec<_>>()
    } else {
        lines.iter().filter_map(|l| parse_plain_line(l)).collect::<Vec<_>>()
    };

    if events.is_empty() {
        warn!(
            raw_len = text.len(),
            "Unrecognized tracking history shape, using empty timeline"
        );
    }
    events
}

fn parse_json(text: &str) -> Vec<TimelineEvent> {
    let items: Vec<Value> = match serde_json::from_str(text) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "Malformed JSON tracking history, using empty timeline");
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| {
            let description = first_string(item, DESCRIPTION_KEYS)?;
            Some(TimelineEvent {
                timestamp: first_string(item, TIME_KEYS).unwrap_or_default(),
                location: first_string(item, LOCATION_KEYS).unwrap_or_default(),
                description,
            })
        })
        .collect()
}

fn first_string(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_html_line(line: &str) -> Option<TimelineEvent> {
    let caps = HTML_LINE.captures(line)?;
    let timestamp = strip_tags(caps.get(1)?.as_str());
    let description = strip_tags(caps.get(2)?.as_str());
    if description.is_empty() {
        return None;
    }
    Some(TimelineEvent::new(timestamp, description))
}

fn parse_plain_line(line: &str) -> Option<TimelineEvent> {
    let (time, description) = line.split_once('|')?;
    let (time, description) = (time.trim(), description.trim());
    if time.is_empty() || description.is_empty() {
        return None;
    }
    Some(TimelineEvent::new(time, description))
}

fn strip_tags(s: &str) -> String {
    HTML_TAG.replace_all(s, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_lines() {
        let raw = "<i>2024-01-01 10:00</i> | 已签收<br><i>2023-12-31 08:00</i> | <b>运输中</b>";
        let events = parse_timeline(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, "2024-01-01 10:00");
        assert_eq!(events[0].description, "已签收");
        assert_eq!(events[1].description, "运输中");
    }

    #[test]
    fn test_plain_lines() {
        let raw = "2024-01-01 10:00|已签收\n2023-12-31 08:00 | 快件已揽收\nnot an event";
        let events = parse_timeline(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].timestamp, "2023-12-31 08:00");
        assert_eq!(events[1].description, "快件已揽收");
    }

    #[test]
    fn test_json_array() {
        let raw = r#"[{"time":"2024-01-01 10:00","context":"已签收","area":"深圳"},{"ftime":"x"}]"#;
        let events = parse_timeline(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].location, "深圳");
        assert_eq!(events[0].description, "已签收");
    }

    #[test]
    fn test_degrades_to_empty() {
        assert!(parse_timeline("").is_empty());
        assert!(parse_timeline("物流信息内容过长，已省略").is_empty());
        assert!(parse_timeline("[not json").is_empty());
        assert!(parse_timeline("just some words").is_empty());
    }
}
