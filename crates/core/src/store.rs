//! In-memory lead store shared by the resolver (paged reads), the ingestor
//! (touch history and stage updates) and the API (creation).

use std::collections::BTreeSet;
use std::ops::Bound;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::{FunnelStage, Lead};

pub struct LeadStore {
    leads: DashMap<Uuid, Lead>,
    /// Ordered id index so corpus scans are restartable from a cursor.
    order: RwLock<BTreeSet<Uuid>>,
}

impl LeadStore {
    pub fn new() -> Self {
        Self {
            leads: DashMap::new(),
            order: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn insert(&self, lead: Lead) {
        let id = lead.id;
        self.leads.insert(id, lead);
        self.order.write().insert(id);
    }

    pub fn get(&self, id: &Uuid) -> Option<Lead> {
        self.leads.get(id).map(|l| l.clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.leads.contains_key(id)
    }

    pub fn stage(&self, id: &Uuid) -> Option<FunnelStage> {
        self.leads.get(id).map(|l| l.stage)
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    /// Mutates one lead under its shard lock. Concurrent updates to the same
    /// lead are serialized.
    pub fn update<R>(&self, id: &Uuid, f: impl FnOnce(&mut Lead) -> R) -> Option<R> {
        self.leads.get_mut(id).map(|mut lead| f(lead.value_mut()))
    }

    /// Up to `limit` leads with ids strictly greater than `after`, in id order.
    pub fn page(&self, after: Option<Uuid>, limit: usize) -> Vec<Lead> {
        let ids: Vec<Uuid> = {
            let order = self.order.read();
            let lower = match after {
                Some(id) => Bound::Excluded(id),
                None => Bound::Unbounded,
            };
            order
                .range((lower, Bound::Unbounded))
                .take(limit)
                .copied()
                .collect()
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }
}

impl Default for LeadStore {
    fn default() -> Self {
        Self::new()
    }
}
