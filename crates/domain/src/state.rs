//! Current-state records.
//!
//! Each record remembers the causal position of the event that produced it,
//! so the store can refuse to overwrite it with an older one.

use chrono::{DateTime, Utc};
use common::{BaseId, BaseKey, ContinentId, Faction, PlayerId, PlayerKey, ServerId};
use event_store::{CausalOrder, EventPayload, RawEvent};
use serde::{Deserialize, Serialize};

/// Which faction holds a base, and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseOwnership {
    pub server_id: ServerId,
    pub base_id: BaseId,
    pub continent_id: ContinentId,
    pub owning_faction: Faction,
    pub owned_since: DateTime<Utc>,
    pub event_sequence: i64,
}

impl BaseOwnership {
    /// Builds the record a base control event implies.
    ///
    /// Returns `None` for any other kind of event.
    pub fn from_event(event: &RawEvent) -> Option<Self> {
        let EventPayload::BaseControl(control) = event.payload else {
            return None;
        };
        Some(Self {
            server_id: event.server_id,
            base_id: control.base_id,
            continent_id: event.continent_id,
            owning_faction: control.new_faction,
            owned_since: event.timestamp,
            event_sequence: event.sequence,
        })
    }

    pub fn key(&self) -> BaseKey {
        BaseKey::new(self.server_id, self.base_id)
    }

    pub fn causal_order(&self) -> CausalOrder {
        (self.owned_since, self.event_sequence)
    }
}

/// Where a player was last seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPresence {
    pub server_id: ServerId,
    pub player_id: PlayerId,
    pub continent_id: ContinentId,
    pub base_id: BaseId,
    pub last_seen: DateTime<Utc>,
    pub event_sequence: i64,
}

impl PlayerPresence {
    /// Builds the record a player blip implies.
    ///
    /// Returns `None` for any other kind of event.
    pub fn from_event(event: &RawEvent) -> Option<Self> {
        let EventPayload::PlayerBlip(blip) = event.payload else {
            return None;
        };
        Some(Self {
            server_id: event.server_id,
            player_id: blip.player_id,
            continent_id: event.continent_id,
            base_id: blip.base_id,
            last_seen: event.timestamp,
            event_sequence: event.sequence,
        })
    }

    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.server_id, self.player_id)
    }

    pub fn causal_order(&self) -> CausalOrder {
        (self.last_seen, self.event_sequence)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn ownership_from_control_event() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = RawEvent::builder()
            .sequence(7)
            .timestamp(at)
            .server(10)
            .continent(2)
            .base_control(2104, Faction::Tr, Faction::Vs);

        let record = BaseOwnership::from_event(&event).unwrap();
        assert_eq!(record.owning_faction, Faction::Vs);
        assert_eq!(record.owned_since, at);
        assert_eq!(record.causal_order(), (at, 7));
        assert_eq!(record.key(), event.base_key().unwrap());
        assert!(PlayerPresence::from_event(&event).is_none());
    }

    #[test]
    fn presence_from_blip() {
        let event = RawEvent::builder()
            .sequence(3)
            .server(10)
            .continent(2)
            .player_blip(42_i64, 2104);

        let record = PlayerPresence::from_event(&event).unwrap();
        assert_eq!(record.base_id, BaseId::new(2104));
        assert_eq!(record.key(), event.player_key().unwrap());
        assert!(BaseOwnership::from_event(&event).is_none());
    }
}
