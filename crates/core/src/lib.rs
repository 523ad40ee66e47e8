pub mod boundary;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod idempotency;
pub mod rules;
pub mod store;
pub mod types;

pub use boundary::{CampaignDirectory, ConfigFeatureGate, FeatureGate, IdentityToken};
pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
pub use event_bus::EventSink;
pub use rules::{ComparisonOperator, LogicalOperator, SegmentationRule};
pub use store::LeadStore;
pub use types::*;
