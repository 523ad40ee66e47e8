//! Lead funnel progression.
//!
//! `new < sent < delivered < opened < clicked < replied`. Bounce and
//! unsubscribe are terminal: they override any progressive stage and a
//! terminal lead never moves again. Dispatch failures leave the stage alone.

use campaign_core::types::{EventKind, FunnelStage};

/// Stage an event kind drives a lead towards, if any.
pub fn stage_for(kind: EventKind) -> Option<FunnelStage> {
    match kind {
        EventKind::Sent => Some(FunnelStage::Sent),
        EventKind::Delivered => Some(FunnelStage::Delivered),
        EventKind::Opened => Some(FunnelStage::Opened),
        EventKind::Clicked => Some(FunnelStage::Clicked),
        EventKind::Replied => Some(FunnelStage::Replied),
        EventKind::Bounced => Some(FunnelStage::Bounced),
        EventKind::Unsubscribed => Some(FunnelStage::Unsubscribed),
        EventKind::Failed => None,
    }
}

pub fn advance(current: FunnelStage, kind: EventKind) -> FunnelStage {
    if current.is_terminal() {
        return current;
    }
    match stage_for(kind) {
        None => current,
        Some(next) if next.is_terminal() => next,
        Some(next) if next.rank() > current.rank() => next,
        Some(_) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_progressive_stages_only_move_forward() {
        assert_eq!(advance(FunnelStage::New, EventKind::Sent), FunnelStage::Sent);
        assert_eq!(advance(FunnelStage::Sent, EventKind::Delivered), FunnelStage::Delivered);
        assert_eq!(advance(FunnelStage::Clicked, EventKind::Opened), FunnelStage::Clicked);
        assert_eq!(advance(FunnelStage::New, EventKind::Replied), FunnelStage::Replied);
        assert_eq!(advance(FunnelStage::Opened, EventKind::Failed), FunnelStage::Opened);
    }

    #[test]
    fn test_terminal_is_sticky() {
        assert_eq!(advance(FunnelStage::Replied, EventKind::Bounced), FunnelStage::Bounced);
        assert_eq!(advance(FunnelStage::Bounced, EventKind::Clicked), FunnelStage::Bounced);
        assert_eq!(
            advance(FunnelStage::Bounced, EventKind::Unsubscribed),
            FunnelStage::Bounced
        );
        assert_eq!(
            advance(FunnelStage::Unsubscribed, EventKind::Replied),
            FunnelStage::Unsubscribed
        );
    }

    fn kind() -> impl Strategy<Value = EventKind> {
        prop::sample::select(EventKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_stage_never_regresses(kinds in prop::collection::vec(kind(), 0..40)) {
            let mut stage = FunnelStage::New;
            for k in kinds {
                let next = advance(stage, k);
                prop_assert!(next.rank() >= stage.rank());
                if stage.is_terminal() {
                    prop_assert_eq!(next, stage);
                }
                stage = next;
            }
        }
    }
}
