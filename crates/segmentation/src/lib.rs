//! Segmentation: rule evaluation, validation and cancelable corpus
//! resolution for campaign targeting.

pub mod builder;
pub mod predicates;
pub mod resolver;
pub mod validate;

pub use builder::RuleBuilder;
pub use predicates::matches;
pub use resolver::{CorpusCursor, LeadCorpus, SegmentationResolver};
pub use validate::validate_rule;
