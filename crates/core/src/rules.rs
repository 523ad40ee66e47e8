//! Segmentation rule tree. Evaluation and validation live in
//! `campaign-segmentation`; this module only carries the data shape shared by
//! campaigns and the resolver.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentationRule {
    /// Boolean combinator evaluated left-to-right with short-circuiting.
    Group {
        operator: LogicalOperator,
        rules: Vec<SegmentationRule>,
    },
    Not {
        rule: Box<SegmentationRule>,
    },
    Attribute {
        key: String,
        operator: ComparisonOperator,
        #[serde(default)]
        value: serde_json::Value,
    },
}

impl SegmentationRule {
    pub fn attribute(
        key: impl Into<String>,
        operator: ComparisonOperator,
        value: serde_json::Value,
    ) -> Self {
        SegmentationRule::Attribute {
            key: key.into(),
            operator,
            value,
        }
    }

    pub fn all(rules: Vec<SegmentationRule>) -> Self {
        SegmentationRule::Group {
            operator: LogicalOperator::And,
            rules,
        }
    }

    pub fn any(rules: Vec<SegmentationRule>) -> Self {
        SegmentationRule::Group {
            operator: LogicalOperator::Or,
            rules,
        }
    }

    pub fn negate(rule: SegmentationRule) -> Self {
        SegmentationRule::Not {
            rule: Box::new(rule),
        }
    }

    /// Nesting depth of the tree; a single attribute predicate has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            SegmentationRule::Group { rules, .. } => {
                1 + rules.iter().map(|r| r.depth()).max().unwrap_or(0)
            }
            SegmentationRule::Not { rule } => 1 + rule.depth(),
            SegmentationRule::Attribute { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsSet,
    IsNotSet,
    InList,
    NotInList,
    Between,
}

impl ComparisonOperator {
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::GreaterThan
                | ComparisonOperator::GreaterThanOrEqual
                | ComparisonOperator::LessThan
                | ComparisonOperator::LessThanOrEqual
        )
    }

    pub fn is_string_match(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Contains
                | ComparisonOperator::NotContains
                | ComparisonOperator::StartsWith
                | ComparisonOperator::EndsWith
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ComparisonOperator::InList | ComparisonOperator::NotInList)
    }

    pub fn is_presence(&self) -> bool {
        matches!(self, ComparisonOperator::IsSet | ComparisonOperator::IsNotSet)
    }
}
