//! Typed validation of raw field candidates.
//!
//! A strategy produces a [`Candidate`] (page text or an embedded JSON value);
//! the field's [`ValueKind`] decides whether it is usable. A rejected
//! candidate is a type mismatch, not a missing value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use hermes_core::models::Price;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d[\d\s\u{a0}.,']*").expect("hardcoded regex pattern is valid")
});

static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("hardcoded regex pattern is valid"));

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)*)\s*([KkMm](?:[^A-Za-z]|$))?")
        .expect("hardcoded regex pattern is valid")
});

static ISO_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{3})\b").expect("hardcoded regex pattern is valid"));

const ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "PLN", "CNY", "JPY", "INR", "RUB", "BRL", "CAD", "AUD", "KRW", "CHF",
    "SEK", "NOK", "DKK", "CZK", "HUF", "RON", "MXN", "TRY", "UAH", "ILS", "NZD", "SGD", "HKD",
];

/// Symbol prefixes checked in order, so `US $` and `R$` win over `$`.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US $", "USD"),
    ("US$", "USD"),
    ("R$", "BRL"),
    ("CA$", "CAD"),
    ("C$", "CAD"),
    ("AU$", "AUD"),
    ("A$", "AUD"),
    ("zł", "PLN"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "CNY"),
    ("₹", "INR"),
    ("₽", "RUB"),
    ("₩", "KRW"),
    ("₴", "UAH"),
    ("₺", "TRY"),
    ("$", "USD"),
];

/// Raw value found by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Text(String),
    Json(Value),
}

impl Candidate {
    /// Wrap an embedded value; JSON strings become text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => Candidate::Text(s.clone()),
            other => Candidate::Json(other.clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            Candidate::Text(s) => format!("{s:?}"),
            Candidate::Json(v) => v.to_string(),
        }
    }
}

/// Expected shape of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Price,
    /// Star rating in `[0, 5]`.
    Rating,
    /// Non-negative integer, `K`/`M` suffixes allowed.
    Count,
    /// Percentage in `[0, 100]`.
    Percent,
}

/// A validated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Price(Price),
    Number(f64),
    Count(u64),
}

impl ValueKind {
    /// Accept or reject a candidate. `Err` carries the mismatch detail.
    pub fn validate(&self, candidate: &Candidate) -> Result<FieldValue, String> {
        let rejected = || format!("{:?} value rejected: {}", self, candidate.describe());
        match (self, candidate) {
            (ValueKind::Text, Candidate::Text(s)) => {
                let text = normalize_whitespace(s);
                if text.is_empty() {
                    Err(rejected())
                } else {
                    Ok(FieldValue::Text(text))
                }
            }
            (ValueKind::Text, Candidate::Json(Value::Number(n))) => {
                Ok(FieldValue::Text(n.to_string()))
            }
            (ValueKind::Price, Candidate::Text(s)) => {
                parse_price(s).map(FieldValue::Price).ok_or_else(rejected)
            }
            (ValueKind::Price, Candidate::Json(v)) => {
                price_from_json(v).map(FieldValue::Price).ok_or_else(rejected)
            }
            (ValueKind::Rating, _) => {
                let rating = candidate_number(candidate).ok_or_else(rejected)?;
                if (0.0..=5.0).contains(&rating) {
                    Ok(FieldValue::Number(rating))
                } else {
                    Err(format!("rating {rating} outside 0-5"))
                }
            }
            (ValueKind::Count, Candidate::Text(s)) => {
                parse_count(s).map(FieldValue::Count).ok_or_else(rejected)
            }
            (ValueKind::Count, Candidate::Json(Value::Number(n))) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
                .map(FieldValue::Count)
                .ok_or_else(rejected),
            (ValueKind::Percent, _) => {
                // Discounts are often written as `-50%`.
                let percent = candidate_number(candidate).ok_or_else(rejected)?.abs();
                if (0.0..=100.0).contains(&percent) {
                    Ok(FieldValue::Number(percent))
                } else {
                    Err(format!("percentage {percent} outside 0-100"))
                }
            }
            _ => Err(rejected()),
        }
    }
}

fn candidate_number(candidate: &Candidate) -> Option<f64> {
    match candidate {
        Candidate::Text(s) => parse_decimal(s),
        Candidate::Json(Value::Number(n)) => n.as_f64(),
        Candidate::Json(_) => None,
    }
}

pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Currency code named or symbolized in a price string.
pub fn detect_currency(text: &str) -> Option<&'static str> {
    for caps in ISO_CODE.captures_iter(text) {
        if let Some(code) = ISO_CODES.iter().find(|c| **c == &caps[1]) {
            return Some(*code);
        }
    }
    CURRENCY_SYMBOLS
        .iter()
        .find(|(symbol, _)| text.contains(symbol))
        .map(|(_, code)| *code)
}

/// Parse a number written with `.`/`,` as decimal or grouping separator.
///
/// The right-most separator is the decimal point when both appear. A lone
/// comma followed by exactly three digits is grouping (`1,234`); otherwise it
/// is a decimal comma (`12,99`).
pub fn parse_number(text: &str) -> Option<f64> {
    let raw = NUMBER.find(text)?.as_str();
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\'')
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ',']);

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let (decimal, grouping) = if d > c { ('.', ',') } else { (',', '.') };
            cleaned
                .replace(grouping, "")
                .replace(decimal, ".")
        }
        (None, Some(_)) => {
            let commas = cleaned.matches(',').count();
            let tail = cleaned.rsplit(',').next().unwrap_or("");
            if commas == 1 && tail.len() != 3 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First plain decimal in the text, `4,8` read as `4.8`. A leading `-` is kept.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let raw = DECIMAL.find(text)?.as_str();
    raw.replace(',', ".").parse().ok()
}

/// Parse a display price like `US $12.99`, `1 234,56 zł` or `€ 8`.
///
/// Both an amount and a currency are required.
pub fn parse_price(text: &str) -> Option<Price> {
    let currency = detect_currency(text)?;
    let value = parse_number(text)?;
    (value >= 0.0).then(|| Price {
        value,
        currency: currency.to_string(),
        raw: normalize_whitespace(text),
    })
}

/// Price from an embedded object such as `{"value": 5.5, "currency": "USD"}`
/// or a schema.org offer.
pub fn price_from_json(value: &Value) -> Option<Price> {
    match value {
        Value::Array(items) => items.first().and_then(price_from_json),
        Value::String(s) => parse_price(s),
        Value::Object(map) => {
            let currency = ["currency", "priceCurrency", "currencyCode"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|c| c.len() == 3);
            let amount = ["value", "price", "amount", "lowPrice", "minPrice"]
                .iter()
                .find_map(|k| map.get(*k))
                .and_then(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => parse_number(s),
                    _ => None,
                });

            match (amount, currency) {
                (Some(amount), Some(currency)) if amount >= 0.0 => Some(Price {
                    value: amount,
                    currency: currency.to_uppercase(),
                    raw: value.to_string(),
                }),
                _ => ["formatedAmount", "formattedAmount", "formatted"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .and_then(parse_price),
            }
        }
        _ => None,
    }
}

/// Parse counts like `1.2K sold`, `1,234 reviews` or `10 000+`.
pub fn parse_count(text: &str) -> Option<u64> {
    let caps = COUNT.captures(text)?;
    let digits = caps.get(1)?.as_str();
    let multiplier = match caps.get(2).and_then(|m| m.as_str().chars().next()) {
        Some('k' | 'K') => 1_000.0,
        Some('m' | 'M') => 1_000_000.0,
        _ => 1.0,
    };

    if multiplier > 1.0 {
        let value: f64 = digits.replace(',', ".").parse().ok()?;
        Some((value * multiplier).round() as u64)
    } else {
        digits.replace(['.', ','], "").parse().ok()
    }
}
