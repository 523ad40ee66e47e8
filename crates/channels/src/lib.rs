//! Channel dispatch: per-channel throttled, retrying delivery of campaign
//! sends through pluggable providers.
//!
//! Each dispatcher admits sends through a token bucket, bounds in-flight work,
//! retries transient provider failures with exponential backoff and emits
//! exactly one outbound event per lead.

pub mod dispatcher;
pub mod provider;
pub mod retry;
pub mod set;
pub mod throttle;

pub use dispatcher::{ChannelDispatcher, DispatchOutcome, DispatchStatus};
pub use provider::{
    build_send_request, ChannelProvider, LoggingProvider, ProviderError, ProviderReceipt,
    SendPayload, SendRequest,
};
pub use retry::RetryPolicy;
pub use set::{DispatcherSet, ProviderSet};
pub use throttle::TokenBucket;
