//! Syntactic validation of segmentation rules, run before a campaign may be
//! scheduled or activated.

use campaign_core::rules::{ComparisonOperator, SegmentationRule};
use campaign_core::{CampaignError, CampaignResult};

const NAMESPACES: [&str; 4] = ["company", "profile", "contact", "lead"];

pub fn validate_rule(rule: &SegmentationRule, max_depth: usize) -> CampaignResult<()> {
    let depth = rule.depth();
    if depth > max_depth {
        return Err(CampaignError::Segmentation(format!(
            "rule nesting depth {depth} exceeds limit {max_depth}"
        )));
    }
    validate_node(rule, "$")
}

fn validate_node(rule: &SegmentationRule, at: &str) -> CampaignResult<()> {
    match rule {
        SegmentationRule::Group { rules, .. } => {
            if rules.is_empty() {
                return Err(invalid(at, "group has no rules"));
            }
            for (i, child) in rules.iter().enumerate() {
                validate_node(child, &format!("{at}.rules[{i}]"))?;
            }
            Ok(())
        }
        SegmentationRule::Not { rule } => validate_node(rule, &format!("{at}.rule")),
        SegmentationRule::Attribute {
            key,
            operator,
            value,
        } => {
            validate_key(key, at)?;
            validate_operand(operator, value, at)
        }
    }
}

fn validate_key(key: &str, at: &str) -> CampaignResult<()> {
    let Some((namespace, rest)) = key.split_once('.') else {
        return Err(invalid(at, &format!("key '{key}' must be namespaced, e.g. company.size")));
    };
    if !NAMESPACES.contains(&namespace) {
        return Err(invalid(at, &format!("unknown attribute namespace '{namespace}'")));
    }
    if rest.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(invalid(at, &format!("key '{key}' has an empty segment")));
    }
    Ok(())
}

fn validate_operand(
    operator: &ComparisonOperator,
    value: &serde_json::Value,
    at: &str,
) -> CampaignResult<()> {
    if operator.is_presence() {
        return Ok(());
    }
    if value.is_null() {
        return Err(invalid(at, &format!("{operator:?} requires a value")));
    }
    if operator.is_ordered() && !value.is_number() {
        return Err(invalid(at, &format!("{operator:?} requires a numeric value")));
    }
    if operator.is_list() && !value.is_array() {
        return Err(invalid(at, &format!("{operator:?} requires an array value")));
    }
    if operator.is_string_match() && !value.is_string() {
        return Err(invalid(at, &format!("{operator:?} requires a string value")));
    }
    if *operator == ComparisonOperator::Between {
        let bounds = value
            .as_array()
            .filter(|b| b.len() == 2)
            .and_then(|b| Some((b[0].as_f64()?, b[1].as_f64()?)));
        match bounds {
            Some((lo, hi)) if lo <= hi => {}
            _ => {
                return Err(invalid(
                    at,
                    "between requires [lo, hi] numeric bounds with lo <= hi",
                ))
            }
        }
    }
    Ok(())
}

fn invalid(at: &str, reason: &str) -> CampaignError {
    CampaignError::Segmentation(format!("{at}: {reason}"))
}
