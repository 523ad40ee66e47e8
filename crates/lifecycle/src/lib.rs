//! Campaign lifecycle: the state machine, the campaign registry and the
//! engine that ties segmentation, dispatch, ingestion and analytics together.

pub mod engine;
pub mod registry;
pub mod state_machine;

pub use engine::{CampaignEngine, EngineBuilder, NewCampaign, NewLead, TickReport};
pub use registry::CampaignRegistry;
pub use state_machine::{Actor, LifecycleAction, TransitionRecord};
