//! Campaign analytics: incremental aggregation of engagement events into
//! rebuildable snapshots, per-user research statistics and optional
//! ClickHouse export.

pub mod aggregator;
pub mod export;
pub mod research;
pub mod snapshot;

pub use aggregator::{AnalyticsAggregator, CampaignMeta};
pub use export::{ClickHouseExporter, EventRow};
pub use research::{BestCampaign, ChannelStats, ResearchStats};
pub use snapshot::{AnalyticsSnapshot, ConversionRates, FunnelCounts, SnapshotScope, TimeRange};
