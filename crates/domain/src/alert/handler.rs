use std::collections::BTreeMap;

use chrono::Duration;
use common::{ContinentKey, EventCategory};
use event_store::{EventPayload, RawEvent};

use super::{AlertRecord, Transition};
use crate::{AlertChange, Handler, PriorKeys, PriorState, ProjectionDelta};

/// Projects continent alert events onto the `continent_alert` table.
///
/// The handler needs the stored alert row of every continent in the batch
/// and emits each changed row together with the position it was derived
/// from, so a concurrent writer is detected at apply time.
#[derive(Debug, Clone, Copy)]
pub struct AlertHandler {
    grace: Duration,
}

impl AlertHandler {
    /// Creates a handler with the given post-alert grace window.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

impl Default for AlertHandler {
    fn default() -> Self {
        Self::new(Duration::minutes(10))
    }
}

impl Handler for AlertHandler {
    fn name(&self) -> &'static str {
        "alert"
    }

    fn category(&self) -> EventCategory {
        EventCategory::ContinentAlert
    }

    fn prior_keys(&self, events: &[RawEvent]) -> PriorKeys {
        let mut alerts: Vec<ContinentKey> = events.iter().map(RawEvent::continent_key).collect();
        alerts.sort();
        alerts.dedup();
        PriorKeys { alerts }
    }

    fn project(&self, events: &[RawEvent], prior: &PriorState) -> ProjectionDelta {
        let mut delta = ProjectionDelta::empty(self.category());
        let mut working: BTreeMap<ContinentKey, (Option<AlertRecord>, AlertRecord)> =
            BTreeMap::new();

        let mut ordered: Vec<&RawEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.causal_order());

        for event in ordered {
            let EventPayload::ContinentAlert(alert) = event.payload else {
                tracing::warn!(
                    sequence = event.sequence,
                    category = %event.category(),
                    "alert handler ignoring foreign event"
                );
                continue;
            };
            let key = event.continent_key();
            let (_, record) = working.entry(key).or_insert_with(|| {
                let stored = prior.alerts.get(&key).copied();
                let start = stored.unwrap_or_else(|| AlertRecord::inactive(key, event.timestamp));
                (stored, start)
            });

            match record.advance(event.causal_order(), alert.alert_id, alert.phase, self.grace) {
                Transition::Changed { from, to } => {
                    tracing::debug!(
                        continent = %key,
                        alert_id = %alert.alert_id,
                        %from,
                        %to,
                        "alert state changed"
                    );
                }
                Transition::Stale => {
                    tracing::debug!(
                        continent = %key,
                        sequence = event.sequence,
                        "stale alert event recorded without state change"
                    );
                }
                Transition::Unchanged => {}
            }
        }

        delta.blips = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::ContinentAlert(_)))
            .cloned()
            .collect();

        delta.alerts = working
            .into_values()
            .filter(|(stored, record)| stored.as_ref() != Some(record))
            .map(|(stored, record)| AlertChange {
                expected: stored.map(|s| s.causal_order()),
                record,
            })
            .collect();
        delta
    }
}
