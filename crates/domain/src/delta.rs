//! The output of a projection: state changes plus history rows.

use chrono::{DateTime, Utc};
use common::EventCategory;
use event_store::{CausalOrder, RawEvent};

use crate::{AlertRecord, BaseOwnership, PlayerPresence};

/// A computed alert row together with the stored row it was derived from.
///
/// The store only writes `record` if the row it holds still sits at
/// `expected`; otherwise another writer got there first and the projection
/// must be redone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertChange {
    /// Causal position of the prior row, or `None` if there was no row.
    pub expected: Option<CausalOrder>,
    pub record: AlertRecord,
}

/// Everything one handler wants written for one batch.
///
/// A delta is applied in a single transaction. `blips` holds one entry per
/// projected event, in causal order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionDelta {
    pub category: EventCategory,
    pub ownership: Vec<BaseOwnership>,
    pub presence: Vec<PlayerPresence>,
    pub alerts: Vec<AlertChange>,
    pub blips: Vec<RawEvent>,
}

impl ProjectionDelta {
    /// Creates an empty delta for the category.
    pub fn empty(category: EventCategory) -> Self {
        Self {
            category,
            ownership: Vec::new(),
            presence: Vec::new(),
            alerts: Vec::new(),
            blips: Vec::new(),
        }
    }

    /// Returns true if applying the delta would write nothing.
    pub fn is_empty(&self) -> bool {
        self.blips.is_empty()
            && self.ownership.is_empty()
            && self.presence.is_empty()
            && self.alerts.is_empty()
    }

    /// Number of current-state rows the delta upserts.
    pub fn state_changes(&self) -> usize {
        self.ownership.len() + self.presence.len() + self.alerts.len()
    }

    /// Event time of the newest blip, if any.
    pub fn newest_event(&self) -> Option<DateTime<Utc>> {
        self.blips.iter().map(|e| e.timestamp).max()
    }
}

/// Counts of what an applied delta actually wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub blips_written: u64,
    /// Rows inserted or updated. Guarded upserts that lost to a newer stored
    /// row are not counted.
    pub rows_updated: u64,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.blips_written += other.blips_written;
        self.rows_updated += other.rows_updated;
    }
}
