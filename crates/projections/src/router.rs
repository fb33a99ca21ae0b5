//! Routing of claimed batches to category handlers.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use common::EventCategory;
use domain::{ApplyReport, Handler, PriorState, screen};
use event_store::{RawEvent, ReferenceData};
use futures_util::future::join_all;

use crate::{ProjectionError, Result, store::ProjectionStore};

/// How often a conflicting apply is re-projected before the batch is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of one category's sub-batch.
#[derive(Debug, Default)]
pub struct CategoryReport {
    /// Events of this category in the routed batch.
    pub received: usize,
    /// Events dropped because their server is not tracked.
    pub ineligible: usize,
    /// Events excluded because they failed validation.
    pub malformed: usize,
    pub applied: ApplyReport,
    /// Apply attempts made, including the successful one.
    pub attempts: u32,
    /// Set when alert state kept conflicting and only history was written.
    pub alerts_skipped: bool,
    /// Set when the sub-batch could not be applied. Its events are lost.
    pub failure: Option<ProjectionError>,
}

/// Outcome of routing one batch.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub categories: BTreeMap<EventCategory, CategoryReport>,
    /// Categories that had events but no registered handler.
    pub unknown: Vec<EventCategory>,
}

impl RouteReport {
    pub fn blips_written(&self) -> u64 {
        self.categories
            .values()
            .map(|c| c.applied.blips_written)
            .sum()
    }

    /// Returns the categories whose sub-batch failed.
    pub fn failed(&self) -> Vec<EventCategory> {
        self.categories
            .iter()
            .filter(|(_, c)| c.failure.is_some())
            .map(|(category, _)| *category)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty() && self.failed().is_empty()
    }
}

/// Splits claimed batches by category and feeds them to handlers.
///
/// Every category has at most one handler. Sub-batches of different
/// categories are projected and applied concurrently, so one failing
/// category never holds back another.
pub struct EventRouter<S: ProjectionStore> {
    store: S,
    handlers: HashMap<EventCategory, Box<dyn Handler>>,
    max_attempts: u32,
}

impl<S: ProjectionStore> EventRouter<S> {
    /// Creates a router with no handlers.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many times an apply is attempted when it conflicts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Registers a handler for its category, replacing any previous one.
    pub fn register(&mut self, handler: Box<dyn Handler>) {
        let category = handler.category();
        if let Some(previous) = self.handlers.insert(category, handler) {
            tracing::warn!(
                %category,
                replaced = previous.name(),
                "replaced handler registration"
            );
        }
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Returns the categories with a registered handler, in a stable order.
    pub fn categories(&self) -> Vec<EventCategory> {
        let mut categories: Vec<_> = self.handlers.keys().copied().collect();
        categories.sort();
        categories
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Routes a claimed batch.
    ///
    /// The batch may mix categories. Within a category, events keep the
    /// order they were claimed in.
    #[tracing::instrument(skip_all, fields(events = batch.len()))]
    pub async fn route(&self, batch: Vec<RawEvent>, reference: &ReferenceData) -> RouteReport {
        let mut by_category: BTreeMap<EventCategory, Vec<RawEvent>> = BTreeMap::new();
        for event in batch {
            by_category.entry(event.category()).or_default().push(event);
        }

        let mut report = RouteReport::default();
        let mut work = Vec::new();
        for (category, events) in by_category {
            match self.handlers.get(&category) {
                Some(handler) => work.push(self.dispatch(handler.as_ref(), events, reference)),
                None => {
                    tracing::error!(
                        %category,
                        dropped = events.len(),
                        "{}",
                        ProjectionError::UnknownCategory(category)
                    );
                    metrics::counter!("controller_unknown_category_total", "category" => category.as_str())
                        .increment(events.len() as u64);
                    report.unknown.push(category);
                }
            }
        }

        for (category, outcome) in join_all(work).await {
            report.categories.insert(category, outcome);
        }
        report
    }

    async fn dispatch(
        &self,
        handler: &dyn Handler,
        events: Vec<RawEvent>,
        reference: &ReferenceData,
    ) -> (EventCategory, CategoryReport) {
        let category = handler.category();
        let mut outcome = CategoryReport {
            received: events.len(),
            ..CategoryReport::default()
        };

        let screened = screen(reference, events);
        outcome.ineligible = screened.ineligible;
        outcome.malformed = screened.rejected.len();
        if screened.ineligible > 0 {
            tracing::debug!(%category, dropped = screened.ineligible, "dropped events from untracked servers");
            metrics::counter!("controller_ineligible_events_total", "category" => category.as_str())
                .increment(screened.ineligible as u64);
        }
        for rejected in &screened.rejected {
            tracing::warn!(%category, sequence = rejected.sequence(), error = %rejected, "excluded malformed event");
        }
        if !screened.rejected.is_empty() {
            metrics::counter!("controller_malformed_events_total", "category" => category.as_str())
                .increment(screened.rejected.len() as u64);
        }

        if screened.accepted.is_empty() {
            return (category, outcome);
        }

        let started = Instant::now();
        match self
            .apply_with_retry(handler, &screened.accepted, &mut outcome)
            .await
        {
            Ok(applied) => {
                tracing::debug!(
                    %category,
                    handler = handler.name(),
                    blips = applied.blips_written,
                    rows = applied.rows_updated,
                    "applied projection"
                );
                metrics::counter!("controller_blips_written_total", "category" => category.as_str())
                    .increment(applied.blips_written);
                metrics::histogram!("controller_apply_duration_seconds", "category" => category.as_str())
                    .record(started.elapsed().as_secs_f64());
                outcome.applied = applied;
            }
            Err(err) => {
                tracing::error!(
                    %category,
                    handler = handler.name(),
                    dropped = screened.accepted.len(),
                    error = %err,
                    "projection failed, batch dropped"
                );
                metrics::counter!("controller_dropped_events_total", "category" => category.as_str())
                    .increment(screened.accepted.len() as u64);
                outcome.failure = Some(err);
            }
        }
        (category, outcome)
    }

    /// Loads prior state, projects, and applies, redoing all three when the
    /// store reports a conflict.
    ///
    /// Once `max_attempts` projections have conflicted, the alert changes are
    /// left to the competing writer and only the rest of the delta is
    /// applied, so every event still gets its history row.
    async fn apply_with_retry(
        &self,
        handler: &dyn Handler,
        events: &[RawEvent],
        outcome: &mut CategoryReport,
    ) -> Result<ApplyReport> {
        let keys = handler.prior_keys(events);
        loop {
            outcome.attempts += 1;
            let prior = if keys.is_empty() {
                PriorState::default()
            } else {
                PriorState::with_alerts(self.store.load_alerts(&keys.alerts).await?)
            };

            let mut delta = handler.project(events, &prior);
            match self.store.apply(&delta).await {
                Err(ProjectionError::ApplyConflict { key }) => {
                    metrics::counter!("controller_apply_conflicts_total", "category" => handler.category().as_str())
                        .increment(1);
                    if outcome.attempts < self.max_attempts {
                        tracing::warn!(
                            handler = handler.name(),
                            continent = %key,
                            attempt = outcome.attempts,
                            "apply conflict, re-projecting"
                        );
                        continue;
                    }

                    tracing::warn!(
                        handler = handler.name(),
                        continent = %key,
                        attempts = outcome.attempts,
                        skipped = delta.alerts.len(),
                        "alert state kept conflicting, writing history only"
                    );
                    delta.alerts.clear();
                    outcome.attempts += 1;
                    outcome.alerts_skipped = true;
                    return self.store.apply(&delta).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use common::{BaseId, ContinentId, ContinentKey, Faction, ServerId};
    use domain::{
        AlertChange, AlertHandler, AlertRecord, AlertState, BaseOwnership, OwnershipHandler,
        PlayerPresence, ProjectionDelta,
    };
    use event_store::{AlertPhase, Base, TrackedServer};

    use super::*;
    use crate::InMemoryProjectionStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reference() -> ReferenceData {
        ReferenceData::new(
            [TrackedServer {
                id: ServerId::new(10),
                name: "Miller".to_string(),
                region: "EU".to_string(),
                tracking_enabled: true,
            }],
            [5, 6].map(|id| Base {
                id: BaseId::new(id),
                name: format!("base-{id}"),
                continent_id: ContinentId::new(2),
                base_type: "Small Outpost".to_string(),
                map_pos_x: 0.0,
                map_pos_y: 0.0,
            }),
        )
    }

    fn control(seq: i64, secs: i64, base: i32) -> RawEvent {
        RawEvent::builder()
            .sequence(seq)
            .timestamp(at(secs))
            .server(10)
            .continent(2)
            .base_control(base, Faction::Vs, Faction::Tr)
    }

    fn alert(seq: i64, secs: i64, phase: AlertPhase) -> RawEvent {
        RawEvent::builder()
            .sequence(seq)
            .timestamp(at(secs))
            .server(10)
            .continent(2)
            .alert(147, phase)
    }

    /// Store wrapper that lets another writer slip in an alert row before
    /// the first `races` applies.
    struct RacingStore {
        inner: InMemoryProjectionStore,
        races: AtomicU32,
    }

    #[async_trait]
    impl ProjectionStore for RacingStore {
        async fn apply(&self, delta: &ProjectionDelta) -> Result<ApplyReport> {
            if self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                let key = ContinentKey::new(ServerId::new(10), ContinentId::new(2));
                let stored = self.inner.alert(key).await;
                let mut record = stored.unwrap_or_else(|| AlertRecord::inactive(key, at(0)));
                let seq = record.event_sequence + 1000;
                record.last_event_at = at(0);
                record.event_sequence = seq;
                let mut competing = ProjectionDelta::empty(EventCategory::ContinentAlert);
                competing.alerts.push(AlertChange {
                    expected: stored.map(|s| s.causal_order()),
                    record,
                });
                self.inner.apply(&competing).await?;
            }
            self.inner.apply(delta).await
        }

        async fn load_alerts(&self, keys: &[ContinentKey]) -> Result<Vec<AlertRecord>> {
            self.inner.load_alerts(keys).await
        }

        async fn ownership(
            &self,
            server_id: ServerId,
            base_id: BaseId,
        ) -> Result<Option<BaseOwnership>> {
            self.inner.ownership(server_id, base_id).await
        }

        async fn ownerships(&self, server_id: ServerId) -> Result<Vec<BaseOwnership>> {
            self.inner.ownerships(server_id).await
        }

        async fn presence_as_of(
            &self,
            server_id: ServerId,
            as_of: DateTime<Utc>,
            window: Duration,
        ) -> Result<Vec<PlayerPresence>> {
            self.inner.presence_as_of(server_id, as_of, window).await
        }

        async fn expire_alerts(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
            self.inner.expire_alerts(now, grace).await
        }

        async fn blip_count(&self, category: EventCategory) -> Result<u64> {
            self.inner.blip_count(category).await
        }
    }

    fn racing_router(races: u32) -> (EventRouter<RacingStore>, InMemoryProjectionStore) {
        let inner = InMemoryProjectionStore::new();
        let store = RacingStore {
            inner: inner.clone(),
            races: AtomicU32::new(races),
        };
        let mut router = EventRouter::new(store);
        router.register(Box::new(AlertHandler::default()));
        (router, inner)
    }

    #[tokio::test]
    async fn routes_each_category_to_its_handler() {
        let mut router = EventRouter::new(InMemoryProjectionStore::new());
        router.register(Box::new(OwnershipHandler::new()));
        router.register(Box::new(AlertHandler::default()));

        let batch = vec![
            control(1, 1, 5),
            alert(2, 2, AlertPhase::Start),
            control(3, 3, 6),
        ];
        let report = router.route(batch, &reference()).await;

        assert!(report.is_clean());
        assert_eq!(report.blips_written(), 3);
        assert_eq!(report.categories[&EventCategory::BaseControl].received, 2);
        assert_eq!(report.categories[&EventCategory::ContinentAlert].attempts, 1);
        assert_eq!(router.categories(), vec![EventCategory::BaseControl, EventCategory::ContinentAlert]);
    }

    #[tokio::test]
    async fn unknown_category_is_skipped() {
        let mut router = EventRouter::new(InMemoryProjectionStore::new());
        router.register(Box::new(OwnershipHandler::new()));

        let batch = vec![control(1, 1, 5), alert(2, 2, AlertPhase::Start)];
        let report = router.route(batch, &reference()).await;

        assert_eq!(report.unknown, vec![EventCategory::ContinentAlert]);
        assert_eq!(report.blips_written(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn malformed_and_ineligible_events_are_excluded() {
        let mut router = EventRouter::new(InMemoryProjectionStore::new());
        router.register(Box::new(OwnershipHandler::new()));

        let untracked = RawEvent::builder()
            .sequence(9)
            .timestamp(at(1))
            .server(77)
            .continent(2)
            .base_control(5, Faction::Vs, Faction::Tr);
        let batch = vec![control(1, 1, 5), control(2, 2, 9999), untracked];
        let report = router.route(batch, &reference()).await;

        let outcome = &report.categories[&EventCategory::BaseControl];
        assert_eq!(outcome.received, 3);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.ineligible, 1);
        assert_eq!(outcome.applied.blips_written, 1);
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn batch_with_only_rejected_events_opens_no_transaction() {
        let store = InMemoryProjectionStore::new();
        let mut router = EventRouter::new(store.clone());
        router.register(Box::new(OwnershipHandler::new()));

        let report = router.route(vec![control(1, 1, 9999)], &reference()).await;
        assert_eq!(report.categories[&EventCategory::BaseControl].attempts, 0);
        assert_eq!(store.transactions_opened(), 0);
    }

    #[tokio::test]
    async fn conflict_is_retried_against_fresh_state() {
        let (router, inner) = racing_router(1);

        let report = router
            .route(vec![alert(1, 10, AlertPhase::Start)], &reference())
            .await;

        let outcome = &report.categories[&EventCategory::ContinentAlert];
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.attempts, 2);
        let stored = inner
            .alert(ContinentKey::new(ServerId::new(10), ContinentId::new(2)))
            .await
            .unwrap();
        assert_eq!(stored.state, AlertState::Active);
        assert_eq!(stored.last_event_at, at(10));
        assert_eq!(inner.blip_count(EventCategory::ContinentAlert).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persistent_conflicts_still_write_history() {
        let (router, inner) = racing_router(10);

        let report = router
            .route(
                vec![alert(1, 10, AlertPhase::Start), alert(2, 20, AlertPhase::End)],
                &reference(),
            )
            .await;

        let outcome = &report.categories[&EventCategory::ContinentAlert];
        assert!(outcome.failure.is_none());
        assert!(outcome.alerts_skipped);
        assert_eq!(outcome.attempts, DEFAULT_MAX_ATTEMPTS + 1);
        assert_eq!(report.blips_written(), 2);
        assert_eq!(inner.blip_count(EventCategory::ContinentAlert).await.unwrap(), 2);

        // The competing writer's row is left in place.
        let stored = inner
            .alert(ContinentKey::new(ServerId::new(10), ContinentId::new(2)))
            .await
            .unwrap();
        assert_eq!(stored.last_event_at, at(0));
    }

    #[tokio::test]
    async fn single_attempt_router_falls_back_immediately() {
        let (router, inner) = racing_router(1);
        let router = router.with_max_attempts(1);

        let report = router
            .route(vec![alert(1, 10, AlertPhase::Start)], &reference())
            .await;

        let outcome = &report.categories[&EventCategory::ContinentAlert];
        assert!(outcome.alerts_skipped);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(inner.blip_count(EventCategory::ContinentAlert).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_category_does_not_block_others() {
        let store = InMemoryProjectionStore::new();
        store.fail_applies(EventCategory::ContinentAlert, true).await;
        let mut router = EventRouter::new(store.clone());
        router.register(Box::new(OwnershipHandler::new()));
        router.register(Box::new(AlertHandler::default()));

        let batch = vec![control(1, 1, 5), alert(2, 2, AlertPhase::Start)];
        let report = router.route(batch, &reference()).await;

        assert_eq!(report.failed(), vec![EventCategory::ContinentAlert]);
        assert!(
            store
                .ownership(ServerId::new(10), BaseId::new(5))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut router = EventRouter::new(InMemoryProjectionStore::new());
        router.register(Box::new(AlertHandler::default()));
        router.register(Box::new(AlertHandler::new(Duration::seconds(5))));
        assert_eq!(router.handler_count(), 1);
    }
}
