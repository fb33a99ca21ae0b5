use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{
    AlertId, BaseId, BaseKey, ContinentId, ContinentKey, EventCategory, Faction, PlayerId,
    PlayerKey, ServerId,
};
use serde::{Deserialize, Serialize};

/// Position of an event in causal order.
///
/// Events are ordered by event time first; the buffer's arrival sequence
/// breaks ties between events reported for the same instant.
pub type CausalOrder = (DateTime<Utc>, i64);

/// A base changed ownership.
///
/// This includes continent (un)locks, which flip every base on the continent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseControl {
    pub base_id: BaseId,
    pub old_faction: Faction,
    pub new_faction: Faction,
}

impl BaseControl {
    /// Returns true if the event did not actually change the owner (a defence).
    pub fn is_defence(&self) -> bool {
        self.old_faction == self.new_faction
    }
}

/// A player was seen contributing to a base capture or defence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerBlip {
    pub player_id: PlayerId,
    pub base_id: BaseId,
}

/// Whether a continent alert started or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    Start,
    End,
}

impl AlertPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPhase::Start => "start",
            AlertPhase::End => "end",
        }
    }
}

impl std::fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(AlertPhase::Start),
            "end" => Ok(AlertPhase::End),
            other => Err(format!("unknown alert phase '{other}'")),
        }
    }
}

/// A continent alert started or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentAlert {
    pub alert_id: AlertId,
    pub phase: AlertPhase,
}

/// Category-specific part of a raw event.
///
/// The variant doubles as the event's category tag. It is chosen by the
/// event store when the row is claimed, based on the buffer table it came
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum EventPayload {
    BaseControl(BaseControl),
    PlayerBlip(PlayerBlip),
    ContinentAlert(ContinentAlert),
}

impl EventPayload {
    /// Returns the category this payload belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::BaseControl(_) => EventCategory::BaseControl,
            EventPayload::PlayerBlip(_) => EventCategory::PlayerBlip,
            EventPayload::ContinentAlert(_) => EventCategory::ContinentAlert,
        }
    }

    /// Returns the base referenced by the payload, if any.
    pub fn base_id(&self) -> Option<BaseId> {
        match self {
            EventPayload::BaseControl(p) => Some(p.base_id),
            EventPayload::PlayerBlip(p) => Some(p.base_id),
            EventPayload::ContinentAlert(_) => None,
        }
    }
}

/// One occurrence of a tracked game fact, as claimed from the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Arrival sequence in the buffer table.
    pub sequence: i64,

    /// When the event happened in game (not when it was buffered).
    pub timestamp: DateTime<Utc>,

    /// The server the event happened on.
    pub server_id: ServerId,

    /// The continent the event happened on.
    pub continent_id: ContinentId,

    /// Category-specific data.
    pub payload: EventPayload,
}

impl RawEvent {
    /// Creates a new raw event builder.
    pub fn builder() -> RawEventBuilder {
        RawEventBuilder::default()
    }

    /// Returns the event category.
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }

    /// Returns the position of this event in causal order.
    pub fn causal_order(&self) -> CausalOrder {
        (self.timestamp, self.sequence)
    }

    /// Returns the continent key of this event.
    pub fn continent_key(&self) -> ContinentKey {
        ContinentKey::new(self.server_id, self.continent_id)
    }

    /// Returns the ownership key, for base control events.
    pub fn base_key(&self) -> Option<BaseKey> {
        match &self.payload {
            EventPayload::BaseControl(p) => Some(BaseKey::new(self.server_id, p.base_id)),
            _ => None,
        }
    }

    /// Returns the presence key, for player blips.
    pub fn player_key(&self) -> Option<PlayerKey> {
        match &self.payload {
            EventPayload::PlayerBlip(p) => Some(PlayerKey::new(self.server_id, p.player_id)),
            _ => None,
        }
    }
}

/// Sorts events into causal order in place.
pub fn sort_causally(events: &mut [RawEvent]) {
    events.sort_by_key(RawEvent::causal_order);
}

/// Builder for constructing raw events.
///
/// The builder is terminated by one of the payload methods, which return the
/// finished event.
#[derive(Debug, Default)]
pub struct RawEventBuilder {
    sequence: i64,
    timestamp: Option<DateTime<Utc>>,
    server_id: Option<ServerId>,
    continent_id: Option<ContinentId>,
}

impl RawEventBuilder {
    /// Sets the arrival sequence. Defaults to 0.
    pub fn sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Sets the event time. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the server.
    pub fn server(mut self, server_id: impl Into<ServerId>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Sets the continent.
    pub fn continent(mut self, continent_id: impl Into<ContinentId>) -> Self {
        self.continent_id = Some(continent_id.into());
        self
    }

    /// Finishes the builder with an arbitrary payload.
    ///
    /// # Panics
    ///
    /// Panics if the server or continent is not set.
    pub fn payload(self, payload: EventPayload) -> RawEvent {
        RawEvent {
            sequence: self.sequence,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            server_id: self.server_id.expect("server_id is required"),
            continent_id: self.continent_id.expect("continent_id is required"),
            payload,
        }
    }

    /// Finishes the builder as a base control event.
    pub fn base_control(
        self,
        base_id: impl Into<BaseId>,
        old_faction: Faction,
        new_faction: Faction,
    ) -> RawEvent {
        self.payload(EventPayload::BaseControl(BaseControl {
            base_id: base_id.into(),
            old_faction,
            new_faction,
        }))
    }

    /// Finishes the builder as a player blip.
    pub fn player_blip(self, player_id: impl Into<PlayerId>, base_id: impl Into<BaseId>) -> RawEvent {
        self.payload(EventPayload::PlayerBlip(PlayerBlip {
            player_id: player_id.into(),
            base_id: base_id.into(),
        }))
    }

    /// Finishes the builder as a continent alert event.
    pub fn alert(self, alert_id: impl Into<AlertId>, phase: AlertPhase) -> RawEvent {
        self.payload(EventPayload::ContinentAlert(ContinentAlert {
            alert_id: alert_id.into(),
            phase,
        }))
    }
}
