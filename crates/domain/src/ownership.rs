//! Base ownership projection.

use std::collections::BTreeMap;

use common::{BaseKey, EventCategory};
use event_store::RawEvent;

use crate::{BaseOwnership, Handler, PriorState, ProjectionDelta};

/// Projects base control events onto the `base_ownership` table.
///
/// Only the causally newest event per base becomes an upsert. Defences
/// (old faction equal to new faction) are recorded like any other capture,
/// refreshing `owned_since`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipHandler;

impl OwnershipHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for OwnershipHandler {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn category(&self) -> EventCategory {
        EventCategory::BaseControl
    }

    fn project(&self, events: &[RawEvent], _prior: &PriorState) -> ProjectionDelta {
        let mut delta = ProjectionDelta::empty(self.category());
        let mut latest: BTreeMap<BaseKey, BaseOwnership> = BTreeMap::new();

        for event in events {
            let Some(record) = BaseOwnership::from_event(event) else {
                tracing::warn!(
                    sequence = event.sequence,
                    category = %event.category(),
                    "ownership handler ignoring foreign event"
                );
                continue;
            };
            latest
                .entry(record.key())
                .and_modify(|current| {
                    if record.causal_order() > current.causal_order() {
                        *current = record;
                    }
                })
                .or_insert(record);
            delta.blips.push(event.clone());
        }

        delta.ownership = latest.into_values().collect();
        delta
    }
}
