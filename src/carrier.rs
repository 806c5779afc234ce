//! Carrier recognition from free-form tracking numbers.
//!
//! All carrier knowledge lives in [`CARRIER_RULES`]: the recognizer walks
//! it in order (first match wins) and the name/code lookups read the same
//! table, so adding a courier is a one-line change.

use std::borrow::Cow;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Errors returned by [`recognize`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("Tracking number is empty")]
    Empty,

    #[error("No carrier rule matches tracking number '{0}'")]
    NoRuleMatched(String),

    #[error("Unknown carrier code '{0}'")]
    UnknownCarrier(String),
}

/// Shape test applied to a normalized (trimmed, uppercased) tracking number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Starts with `prefix` and is at least `min_len` characters long
    Prefix { prefix: &'static str, min_len: usize },
    /// Only ASCII digits, with one of the given lengths
    Digits { lengths: &'static [usize] },
    /// `prefix` followed by one or more ASCII alphanumerics
    PrefixAlphanumeric { prefix: &'static str },
}

impl Pattern {
    fn matches(&self, number: &str) -> bool {
        match *self {
            Pattern::Prefix { prefix, min_len } => {
                number.starts_with(prefix) && number.chars().count() >= min_len
            }
            Pattern::Digits { lengths } => {
                !number.is_empty()
                    && number.chars().all(|c| c.is_ascii_digit())
                    && lengths.contains(&number.len())
            }
            Pattern::PrefixAlphanumeric { prefix } => match number.strip_prefix(prefix) {
                Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()),
                None => false,
            },
        }
    }
}

/// One courier: its code, display name, recognition patterns and wire quirks.
#[derive(Debug, Clone, Copy)]
pub struct CarrierRule {
    pub code: &'static str,
    pub name: &'static str,
    /// Other names staff or imports use for this courier
    pub aliases: &'static [&'static str],
    /// Evaluated in order; empty means lookup-only (never recognized)
    pub patterns: &'static [Pattern],
    /// Remote queries need `||` + phone tail appended to each number
    pub requires_phone_tail: bool,
}

/// The carrier table. Order matters: recognition is first-match-wins.
pub const CARRIER_RULES: &[CarrierRule] = &[
    CarrierRule {
        code: "yuantong",
        name: "圆通速递",
        aliases: &["圆通", "YTO"],
        patterns: &[Pattern::Prefix { prefix: "YT", min_len: 12 }],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "jingdong",
        name: "京东快递",
        aliases: &["京东", "京东物流", "JD"],
        patterns: &[Pattern::Prefix { prefix: "JD", min_len: 10 }],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "kuayuesuyun",
        name: "跨越速运",
        aliases: &["跨越"],
        patterns: &[Pattern::Prefix { prefix: "KY", min_len: 12 }],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "shentong",
        name: "申通快递",
        aliases: &["申通", "STO"],
        patterns: &[Pattern::Prefix { prefix: "ST", min_len: 12 }],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "zhongtong",
        name: "中通快递",
        aliases: &["中通", "ZTO"],
        patterns: &[Pattern::Prefix { prefix: "ZT", min_len: 12 }],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "shunfeng",
        name: "顺丰速运",
        aliases: &["顺丰", "顺丰快递", "SF"],
        patterns: &[
            Pattern::Digits { lengths: &[12, 15] },
            Pattern::PrefixAlphanumeric { prefix: "SF" },
        ],
        requires_phone_tail: true,
    },
    CarrierRule {
        code: "yunda",
        name: "韵达快递",
        aliases: &["韵达"],
        patterns: &[],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "ems",
        name: "EMS",
        aliases: &["邮政EMS", "中国邮政"],
        patterns: &[],
        requires_phone_tail: false,
    },
    CarrierRule {
        code: "debangwuliu",
        name: "德邦快递",
        aliases: &["德邦", "德邦物流"],
        patterns: &[],
        requires_phone_tail: false,
    },
];

/// Result of a successful recognition.
///
/// Table carriers borrow from [`CARRIER_RULES`]; an explicit code the table
/// does not know is carried as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Carrier {
    pub code: Cow<'static, str>,
    pub name: Cow<'static, str>,
}

impl Carrier {
    /// Carrier outside the table, sent to the provider under its own code.
    pub fn passthrough(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: Cow::Owned(code.clone()),
            code: Cow::Owned(code),
        }
    }
}

impl From<&CarrierRule> for Carrier {
    fn from(rule: &CarrierRule) -> Self {
        Self {
            code: Cow::Borrowed(rule.code),
            name: Cow::Borrowed(rule.name),
        }
    }
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// Classify a raw tracking number into a carrier.
///
/// Input is trimmed and uppercased before the rules run.
///
/// # Errors
/// Returns `RecognitionError` when the input is blank or no rule matches.
pub fn recognize(raw: &str) -> Result<Carrier, RecognitionError> {
    let number = raw.trim().to_uppercase();
    if number.is_empty() {
        return Err(RecognitionError::Empty);
    }

    CARRIER_RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| p.matches(&number)))
        .map(Carrier::from)
        .ok_or(RecognitionError::NoRuleMatched(number))
}

/// Look up a carrier rule by code (case-insensitive).
pub fn rule_for_code(code: &str) -> Option<&'static CarrierRule> {
    let code = code.trim();
    CARRIER_RULES
        .iter()
        .find(|rule| rule.code.eq_ignore_ascii_case(code))
}

/// Display name for a carrier code.
pub fn carrier_name(code: &str) -> Option<&'static str> {
    rule_for_code(code).map(|rule| rule.name)
}

/// Carrier code for a display name or alias.
pub fn carrier_code(name: &str) -> Option<&'static str> {
    let name = name.trim();
    CARRIER_RULES
        .iter()
        .find(|rule| {
            rule.name.eq_ignore_ascii_case(name)
                || rule.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
        })
        .map(|rule| rule.code)
}

/// Whether remote queries for this carrier must carry a phone tail.
pub fn requires_phone_tail(code: &str) -> bool {
    rule_for_code(code).is_some_and(|rule| rule.requires_phone_tail)
}

/// Resolve a carrier for an order: an explicit code wins over recognition.
///
/// An explicit code missing from the table is passed through unchanged,
/// without phone-tail handling.
///
/// # Errors
/// Whatever [`recognize`] returns when no explicit code is set.
pub fn resolve(explicit_code: Option<&str>, tracking_number: &str) -> Result<Carrier, RecognitionError> {
    match explicit_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => match rule_for_code(code) {
            Some(rule) => Ok(Carrier::from(rule)),
            None => {
                warn!(carrier = code, tracking_number, "Carrier code not in table, passing through");
                Ok(Carrier::passthrough(code))
            }
        },
        None => recognize(tracking_number),
    }
}
