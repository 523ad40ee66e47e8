//! Predicate evaluation for segmentation rules.

use campaign_core::rules::{ComparisonOperator, LogicalOperator, SegmentationRule};
use campaign_core::types::Lead;
use std::cmp::Ordering;

/// Evaluates `rule` against one lead. Groups short-circuit left-to-right;
/// a missing attribute is a non-match for every operator except `is_not_set`.
pub fn matches(rule: &SegmentationRule, lead: &Lead) -> bool {
    match rule {
        SegmentationRule::Group { operator, rules } => match operator {
            LogicalOperator::And => rules.iter().all(|r| matches(r, lead)),
            LogicalOperator::Or => rules.iter().any(|r| matches(r, lead)),
        },
        SegmentationRule::Not { rule } => !matches(rule, lead),
        SegmentationRule::Attribute {
            key,
            operator,
            value,
        } => match lead.attribute(key) {
            Some(actual) => compare_values(&actual, operator, value),
            None => matches!(operator, ComparisonOperator::IsNotSet),
        },
    }
}

pub fn compare_values(
    actual: &serde_json::Value,
    operator: &ComparisonOperator,
    expected: &serde_json::Value,
) -> bool {
    match operator {
        ComparisonOperator::Equals => loosely_equal(actual, expected),
        ComparisonOperator::NotEquals => !loosely_equal(actual, expected),
        ComparisonOperator::GreaterThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == Ordering::Greater)
        }
        ComparisonOperator::GreaterThanOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != Ordering::Less)
        }
        ComparisonOperator::LessThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == Ordering::Less)
        }
        ComparisonOperator::LessThanOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != Ordering::Greater)
        }
        ComparisonOperator::Contains => contains(actual, expected),
        ComparisonOperator::NotContains => !contains(actual, expected),
        ComparisonOperator::StartsWith => actual
            .as_str()
            .zip(expected.as_str())
            .is_some_and(|(a, e)| a.starts_with(e)),
        ComparisonOperator::EndsWith => actual
            .as_str()
            .zip(expected.as_str())
            .is_some_and(|(a, e)| a.ends_with(e)),
        ComparisonOperator::IsSet => !actual.is_null(),
        ComparisonOperator::IsNotSet => actual.is_null(),
        ComparisonOperator::InList => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| loosely_equal(actual, v))),
        ComparisonOperator::NotInList => expected
            .as_array()
            .is_some_and(|list| !list.iter().any(|v| loosely_equal(actual, v))),
        ComparisonOperator::Between => between(actual, expected),
    }
}

/// String containment, or membership when the attribute is an array
/// (e.g. `profile.interests contains "saas"`).
fn contains(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match actual {
        serde_json::Value::String(a) => expected.as_str().is_some_and(|e| a.contains(e)),
        serde_json::Value::Array(items) => items.iter().any(|v| loosely_equal(v, expected)),
        _ => false,
    }
}

fn between(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    let Some(bounds) = expected.as_array() else {
        return false;
    };
    let (Some(lo), Some(hi)) = (bounds.first(), bounds.get(1)) else {
        return false;
    };
    numeric_cmp(actual, lo).is_some_and(|o| o != Ordering::Less)
        && numeric_cmp(actual, hi).is_some_and(|o| o != Ordering::Greater)
}

/// Numbers compare by value so that `100` equals `100.0`.
fn loosely_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}
