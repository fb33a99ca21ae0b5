//! The handler abstraction.

use std::collections::HashMap;

use common::{ContinentKey, EventCategory};
use event_store::RawEvent;

use crate::{AlertRecord, ProjectionDelta};

/// Stored rows a handler needs to see before it can project a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorKeys {
    pub alerts: Vec<ContinentKey>,
}

impl PriorKeys {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Stored rows loaded for a batch, as of the start of one apply attempt.
#[derive(Debug, Clone, Default)]
pub struct PriorState {
    pub alerts: HashMap<ContinentKey, AlertRecord>,
}

impl PriorState {
    pub fn with_alerts(alerts: impl IntoIterator<Item = AlertRecord>) -> Self {
        Self {
            alerts: alerts.into_iter().map(|a| (a.key(), a)).collect(),
        }
    }
}

/// A pure projection from one category's events to a state delta.
///
/// Handlers never touch a store. Whatever stored state they depend on is
/// requested through [`Handler::prior_keys`] and handed to
/// [`Handler::project`] by the caller.
pub trait Handler: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// The single category this handler consumes.
    fn category(&self) -> EventCategory;

    /// Returns the stored rows that must be loaded before projecting.
    fn prior_keys(&self, _events: &[RawEvent]) -> PriorKeys {
        PriorKeys::default()
    }

    /// Computes the delta for a batch.
    ///
    /// `events` are in causal order and all belong to [`Handler::category`].
    fn project(&self, events: &[RawEvent], prior: &PriorState) -> ProjectionDelta;
}
