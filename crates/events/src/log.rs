//! Append-only event log with an insert-if-absent dedup index.

use campaign_core::types::Event;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct EventLog {
    /// dedup key -> event id
    index: DashMap<String, Uuid>,
    events: RwLock<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` unless an event with the same dedup key is already
    /// recorded. Returns the id of the existing event on conflict.
    pub fn append(&self, event: Event) -> Result<(), Uuid> {
        match self.index.entry(event.dedup_key()) {
            Entry::Occupied(existing) => Err(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(event.id);
                self.events.write().push(event);
                Ok(())
            }
        }
    }

    pub fn contains_key(&self, dedup_key: &str) -> bool {
        self.index.contains_key(dedup_key)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Every event in acceptance order.
    pub fn all(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn for_campaign(&self, campaign_id: Uuid) -> Vec<Event> {
        self.filtered(|e| e.campaign_id == campaign_id)
    }

    pub fn for_lead(&self, lead_id: Uuid) -> Vec<Event> {
        self.filtered(|e| e.lead_id == lead_id)
    }

    fn filtered(&self, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events.read().iter().filter(|e| pred(e)).cloned().collect()
    }
}
