//! Continent alert state machine.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use common::{AlertId, ContinentId, ContinentKey, ServerId};
use event_store::{AlertPhase, CausalOrder};
use serde::{Deserialize, Serialize};

/// The state of a continent's alert.
///
/// State transitions:
/// ```text
///            start              end
/// Inactive ───────► Active ──────────► Ending
///    ▲                ▲                  │
///    │                └──── start ───────┤
///    └──────────── grace elapsed ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// No alert is running (initial and terminal state).
    #[default]
    Inactive,

    /// An alert is running.
    Active,

    /// The alert ended; the continent is in its post-alert grace window.
    Ending,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Inactive => "inactive",
            AlertState::Active => "active",
            AlertState::Ending => "ending",
        }
    }

    /// Returns the state after an alert phase event.
    ///
    /// An end outside of a running alert leaves the state unchanged.
    pub fn on_phase(self, phase: AlertPhase) -> AlertState {
        match (self, phase) {
            (_, AlertPhase::Start) => AlertState::Active,
            (AlertState::Active, AlertPhase::End) => AlertState::Ending,
            (state, AlertPhase::End) => state,
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(AlertState::Inactive),
            "active" => Ok(AlertState::Active),
            "ending" => Ok(AlertState::Ending),
            other => Err(format!("unknown alert state '{other}'")),
        }
    }
}

/// What an event did to an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state moved.
    Changed { from: AlertState, to: AlertState },
    /// The event was recorded but the state did not move.
    Unchanged,
    /// The event is older than the record and was ignored.
    Stale,
}

/// Persisted alert state of one continent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub server_id: ServerId,
    pub continent_id: ContinentId,
    pub state: AlertState,
    /// The running (or just ended) alert; `None` while inactive.
    pub alert_id: Option<AlertId>,
    pub state_since: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub event_sequence: i64,
}

impl AlertRecord {
    /// Creates an inactive record that has not seen any event yet.
    pub fn inactive(key: ContinentKey, since: DateTime<Utc>) -> Self {
        Self {
            server_id: key.server_id,
            continent_id: key.continent_id,
            state: AlertState::Inactive,
            alert_id: None,
            state_since: since,
            last_event_at: DateTime::<Utc>::MIN_UTC,
            event_sequence: 0,
        }
    }

    pub fn key(&self) -> ContinentKey {
        ContinentKey::new(self.server_id, self.continent_id)
    }

    pub fn causal_order(&self) -> CausalOrder {
        (self.last_event_at, self.event_sequence)
    }

    /// Returns the instant an `Ending` record falls back to `Inactive`.
    ///
    /// A window too long to represent never closes.
    pub fn grace_expires_at(&self, grace: Duration) -> Option<DateTime<Utc>> {
        if self.state == AlertState::Ending {
            self.state_since.checked_add_signed(grace)
        } else {
            None
        }
    }

    /// Closes the grace window if it has elapsed by `now`.
    ///
    /// The record becomes inactive as of the moment the window closed, not
    /// as of `now`, so lazy and swept expiry produce the same row.
    pub fn settle(&mut self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.grace_expires_at(grace) {
            Some(expires_at) if expires_at <= now => {
                self.state = AlertState::Inactive;
                self.alert_id = None;
                self.state_since = expires_at;
                true
            }
            _ => false,
        }
    }

    /// Applies one alert phase event.
    pub fn advance(
        &mut self,
        order: CausalOrder,
        alert_id: AlertId,
        phase: AlertPhase,
        grace: Duration,
    ) -> Transition {
        if order <= self.causal_order() {
            return Transition::Stale;
        }
        let (timestamp, sequence) = order;
        let from = self.state;

        self.settle(timestamp, grace);
        let to = self.state.on_phase(phase);
        if to != self.state {
            self.state = to;
            self.state_since = timestamp;
        }
        if phase == AlertPhase::Start {
            self.alert_id = Some(alert_id);
        }
        self.last_event_at = timestamp;
        self.event_sequence = sequence;

        if from == self.state {
            Transition::Unchanged
        } else {
            Transition::Changed {
                from,
                to: self.state,
            }
        }
    }
}
