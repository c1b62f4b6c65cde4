//! Explicit value coercion for comparing rendered text and JSON payloads.
//!
//! The application under test renders numbers as formatted text ("3 records")
//! and its API returns numeric columns as JSON numbers while the test
//! submitted strings. Every comparison in this crate goes through one of
//! the rules below so that both sides are converted to the same
//! representation before equality is checked. Nothing is coerced implicitly.

use serde_json::Value;

/// Render a JSON value the way JavaScript's `String(value)` would.
///
/// `None` (an absent field) renders as `"undefined"`.
#[must_use]
pub fn js_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(value) => js_string_of(value),
    }
}

fn js_string_of(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => js_number(n),
        // Array.prototype.toString: null/undefined elements become ""
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string_of(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn js_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().map_or_else(|| n.to_string(), js_float)
}

/// `Number.prototype.toString()` for a float: positional notation inside
/// `[1e-6, 1e21)`, exponent notation (`1e-7`, `1.5e+21`) outside it.
fn js_float(f: f64) -> String {
    if f == 0.0 {
        // covers -0
        return "0".to_string();
    }
    if (1e-6..1e21).contains(&f.abs()) {
        return f.to_string();
    }
    let exp = format!("{f:e}");
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
        _ => exp,
    }
}

/// JavaScript truthiness of an optional JSON value
#[must_use]
pub fn js_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

/// `parseInt(text.split(' ')[0])`: the leading integer of the first
/// space-separated token, or `None` where JavaScript would yield `NaN`.
///
/// Values outside `i64` also yield `None`.
#[must_use]
pub fn leading_int(text: &str) -> Option<i64> {
    let token = text.split(' ').next().unwrap_or_default();
    parse_int(token)
}

fn parse_int(token: &str) -> Option<i64> {
    let trimmed = token.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (radix, digits) = if rest.len() > 1 && (rest.starts_with("0x") || rest.starts_with("0X")) {
        (16, &rest[2..])
    } else {
        (10, rest)
    };

    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map_or(digits.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }

    let magnitude = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// An expected value together with the rule used to compare observations to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Observed text must equal this string exactly
    Text(String),
    /// `leading_int(observed)` must equal this number
    Integer(i64),
}

impl Expectation {
    /// Exact text expectation
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Leading-integer expectation
    #[must_use]
    pub const fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    /// Check an observation against this expectation
    #[must_use]
    pub fn matches(&self, observed: &str) -> bool {
        match self {
            Self::Text(expected) => observed == expected,
            Self::Integer(expected) => leading_int(observed) == Some(*expected),
        }
    }
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Integer(n) => write!(f, "{n}"),
        }
    }
}

/// Body predicate: `String(body[field]) === String(expected)`
pub fn field_equals(
    field: impl Into<String>,
    expected: impl Into<Value>,
) -> impl Fn(&Value) -> bool + Send + Sync + 'static {
    let field = field.into();
    let expected = js_string_of(&expected.into());
    move |body| js_string(body.get(&field)) == expected
}

/// Body predicate: `body[field]` is truthy
pub fn field_truthy(field: impl Into<String>) -> impl Fn(&Value) -> bool + Send + Sync + 'static {
    let field = field.into();
    move |body| js_truthy(body.get(&field))
}
