//! Rule builder: fluent API for constructing segmentation rules.

use campaign_core::rules::{ComparisonOperator, LogicalOperator, SegmentationRule};

pub struct RuleBuilder {
    operator: LogicalOperator,
    rules: Vec<SegmentationRule>,
}

impl RuleBuilder {
    /// Starts an `and` group.
    pub fn new() -> Self {
        Self {
            operator: LogicalOperator::And,
            rules: Vec::new(),
        }
    }

    pub fn with_or(mut self) -> Self {
        self.operator = LogicalOperator::Or;
        self
    }

    pub fn attribute(
        mut self,
        key: impl Into<String>,
        operator: ComparisonOperator,
        value: serde_json::Value,
    ) -> Self {
        self.rules
            .push(SegmentationRule::attribute(key, operator, value));
        self
    }

    pub fn attribute_equals(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attribute(key, ComparisonOperator::Equals, value)
    }

    pub fn attribute_gt(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attribute(key, ComparisonOperator::GreaterThan, value)
    }

    pub fn attribute_in(self, key: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.attribute(key, ComparisonOperator::InList, serde_json::Value::Array(values))
    }

    pub fn has(self, key: impl Into<String>) -> Self {
        self.attribute(key, ComparisonOperator::IsSet, serde_json::Value::Null)
    }

    pub fn excluding(mut self, rule: SegmentationRule) -> Self {
        self.rules.push(SegmentationRule::negate(rule));
        self
    }

    pub fn group(mut self, nested: RuleBuilder) -> Self {
        self.rules.push(nested.build());
        self
    }

    /// A single-predicate builder collapses to the bare predicate.
    pub fn build(mut self) -> SegmentationRule {
        if self.rules.len() == 1 {
            if let Some(only) = self.rules.pop() {
                return only;
            }
        }
        SegmentationRule::Group {
            operator: self.operator,
            rules: self.rules,
        }
    }
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
