//! Units waiting for stock at a location.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::AggregateId;

/// An inventory unit that was sold without stock on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderedUnit {
    pub unit_id: Uuid,
    /// Order stream the unit belongs to.
    pub order_id: AggregateId,
    pub backordered_at: DateTime<Utc>,
}

/// FIFO queue of backordered units; the front is the oldest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackorderQueue {
    units: VecDeque<BackorderedUnit>,
}

impl BackorderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, unit_id: Uuid) -> bool {
        self.units.iter().any(|u| u.unit_id == unit_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackorderedUnit> {
        self.units.iter()
    }

    /// The `n` oldest units, without removing them.
    pub fn oldest(&self, n: usize) -> impl Iterator<Item = &BackorderedUnit> {
        self.units.iter().take(n)
    }

    pub fn push(&mut self, unit: BackorderedUnit) {
        self.units.push_back(unit);
    }

    pub fn remove(&mut self, unit_id: Uuid) -> Option<BackorderedUnit> {
        let idx = self.units.iter().position(|u| u.unit_id == unit_id)?;
        self.units.remove(idx)
    }
}
