//! Player presence projection and population counting.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::{BaseId, ContinentId, EventCategory, PlayerKey};
use event_store::RawEvent;
use serde::Serialize;

use crate::{Handler, PlayerPresence, PriorState, ProjectionDelta};

/// Default window after which a silent player no longer counts as present.
pub fn default_presence_window() -> Duration {
    Duration::minutes(15)
}

/// Returns the oldest sighting time that still counts at `as_of`.
///
/// Sightings must be strictly newer than this. A window reaching past the
/// representable range is cut off at the Unix epoch, which every store can
/// encode.
pub fn presence_cutoff(as_of: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    as_of
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Projects player blips onto the `player_presence` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationHandler;

impl PopulationHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for PopulationHandler {
    fn name(&self) -> &'static str {
        "population"
    }

    fn category(&self) -> EventCategory {
        EventCategory::PlayerBlip
    }

    fn project(&self, events: &[RawEvent], _prior: &PriorState) -> ProjectionDelta {
        let mut delta = ProjectionDelta::empty(self.category());
        let mut latest: BTreeMap<PlayerKey, PlayerPresence> = BTreeMap::new();

        for event in events {
            let Some(record) = PlayerPresence::from_event(event) else {
                tracing::warn!(
                    sequence = event.sequence,
                    category = %event.category(),
                    "population handler ignoring foreign event"
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

        delta.presence = latest.into_values().collect();
        delta
    }
}

/// Player counts at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulationSnapshot {
    pub as_of: DateTime<Utc>,
    pub per_base: BTreeMap<BaseId, u32>,
    pub per_continent: BTreeMap<ContinentId, u32>,
    pub total: u32,
}

impl PopulationSnapshot {
    pub fn base(&self, id: BaseId) -> u32 {
        self.per_base.get(&id).copied().unwrap_or(0)
    }

    pub fn continent(&self, id: ContinentId) -> u32 {
        self.per_continent.get(&id).copied().unwrap_or(0)
    }
}

/// Counts players per base and per continent at `as_of`.
///
/// `presences` should hold each player's latest sighting at or before
/// `as_of`. A player counts if that sighting is no older than `window`.
/// Sightings after `as_of` are ignored, and a player seen more than once is
/// counted once, at their newest sighting.
pub fn tally<'a>(
    presences: impl IntoIterator<Item = &'a PlayerPresence>,
    as_of: DateTime<Utc>,
    window: Duration,
) -> PopulationSnapshot {
    let oldest = presence_cutoff(as_of, window);
    let mut newest: BTreeMap<PlayerKey, &PlayerPresence> = BTreeMap::new();
    for presence in presences {
        if presence.last_seen > as_of {
            continue;
        }
        newest
            .entry(presence.key())
            .and_modify(|current| {
                if presence.causal_order() > current.causal_order() {
                    *current = presence;
                }
            })
            .or_insert(presence);
    }

    let mut per_base = BTreeMap::new();
    let mut per_continent = BTreeMap::new();
    let mut total = 0;
    for presence in newest.values().filter(|p| p.last_seen > oldest) {
        total += 1;
        *per_base.entry(presence.base_id).or_insert(0) += 1;
        *per_continent.entry(presence.continent_id).or_insert(0) += 1;
    }

    PopulationSnapshot {
        as_of,
        per_base,
        per_continent,
        total,
    }
}
