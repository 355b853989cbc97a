//! Conditional filters gating notifications, channels and providers.
//!
//! A [`Filter`] combines [`FilterExpression`]s with AND/OR. Each expression
//! reads a property from either the recipient profile or the event data and
//! compares it against a target value. Whether a matching filter selects or
//! hides its owner is decided by [`Behavior`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// `show` selects the owner when the filter matches; `hide` when it does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Show,
    #[default]
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterSource {
    Profile,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    NotEmpty,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
    IncludedIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpression {
    pub source: FilterSource,
    /// Dot-separated path, e.g. `address.country` or `items.0.sku`.
    pub property: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub filters: Vec<FilterExpression>,
    #[serde(default)]
    pub behavior: Behavior,
}

/// The two records a filter expression can read from.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub profile: &'a Value,
    pub data: &'a Value,
}

impl<'a> FilterContext<'a> {
    pub fn new(profile: &'a Value, data: &'a Value) -> Self {
        Self { profile, data }
    }

    fn source(&self, source: FilterSource) -> &'a Value {
        match source {
            FilterSource::Profile => self.profile,
            FilterSource::Data => self.data,
        }
    }
}

impl Filter {
    /// A filter with no expressions is no filter at all.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether the expressions match, combined by the logical operator.
    pub fn evaluate(&self, ctx: &FilterContext<'_>) -> bool {
        match self.logical_operator {
            LogicalOperator::And => self.filters.iter().all(|f| f.evaluate(ctx)),
            LogicalOperator::Or => self.filters.iter().any(|f| f.evaluate(ctx)),
        }
    }

    /// Whether the owner of this filter is eligible under its behavior.
    pub fn passes(&self, ctx: &FilterContext<'_>) -> bool {
        if self.is_empty() {
            return true;
        }
        let matched = self.evaluate(ctx);
        match self.behavior {
            Behavior::Show => matched,
            Behavior::Hide => !matched,
        }
    }
}

/// Eligibility of an owner that may or may not carry a filter.
pub fn passes(filter: Option<&Filter>, ctx: &FilterContext<'_>) -> bool {
    filter.is_none_or(|f| f.passes(ctx))
}

impl FilterExpression {
    /// Evaluate against the context. An absent property never matches.
    pub fn evaluate(&self, ctx: &FilterContext<'_>) -> bool {
        let Some(actual) = lookup(ctx.source(self.source), &self.property) else {
            return false;
        };
        let target = self.value.as_ref().unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::Equals => loosely_equal(actual, target),
            FilterOperator::NotEquals => !loosely_equal(actual, target),
            FilterOperator::Contains => contains(actual, target),
            FilterOperator::NotContains => !contains(actual, target),
            FilterOperator::StartsWith => as_text(actual)
                .zip(as_text(target))
                .is_some_and(|(a, t)| a.starts_with(&t)),
            FilterOperator::EndsWith => as_text(actual)
                .zip(as_text(target))
                .is_some_and(|(a, t)| a.ends_with(&t)),
            FilterOperator::IsEmpty => is_empty(actual),
            FilterOperator::NotEmpty => !is_empty(actual),
            FilterOperator::GreaterThan => compare(actual, target).is_some_and(|o| o.is_gt()),
            FilterOperator::GreaterThanEquals => compare(actual, target).is_some_and(|o| o.is_ge()),
            FilterOperator::LessThan => compare(actual, target).is_some_and(|o| o.is_lt()),
            FilterOperator::LessThanEquals => compare(actual, target).is_some_and(|o| o.is_le()),
            FilterOperator::IncludedIn => contains(target, actual),
        }
    }
}

/// Resolve a dot-separated path. Numeric segments index into arrays.
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            as_number(a).zip(as_number(b)).is_some_and(|(x, y)| x == y)
        }
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Bool(_), Value::String(_)) | (Value::String(_), Value::Bool(_)) => {
            as_text(a).zip(as_text(b)).is_some_and(|(x, y)| x.eq_ignore_ascii_case(&y))
        }
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => as_text(needle).is_some_and(|key| map.contains_key(&key)),
        _ => as_text(haystack)
            .zip(as_text(needle))
            .is_some_and(|(h, n)| h.contains(&n)),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match as_number(a).zip(as_number(b)) {
        Some((x, y)) => x.partial_cmp(&y),
        None => as_text(a).zip(as_text(b)).map(|(x, y)| x.cmp(&y)),
    }
}
