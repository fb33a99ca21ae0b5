//! The poll loop that drives claim, route, and apply.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{EventCategory, ServerId};
use event_store::{EventStore, RawEvent, ReferenceData, ReferenceStore};
use futures_util::future::join_all;
use projections::{EventRouter, ProjectionStore, ProjectionStoreExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;

/// Timing knobs of the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Sleep between ticks that found no work.
    pub poll_interval: Duration,
    /// How old an event must be before it is claimed.
    pub settle_age: Duration,
    /// How long a reference snapshot is reused.
    pub reference_ttl: Duration,
    /// Post-alert grace window swept at the end of each tick.
    pub alert_grace: Duration,
    /// How long a sighting keeps a player counted at a base.
    pub presence_window: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            settle_age: config.settle_age,
            reference_ttl: config.reference_ttl,
            alert_grace: config.alert_grace,
            presence_window: config.presence_window,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Events claimed across all categories.
    pub claimed: usize,
    pub blips_written: u64,
    /// Categories whose claim failed; their rows stay buffered.
    pub skipped: Vec<EventCategory>,
    /// Categories whose apply failed; their claimed events are lost.
    pub failed: Vec<EventCategory>,
    pub alerts_expired: u64,
    /// Players counted per tracked server at the end of the tick.
    pub population: BTreeMap<ServerId, u32>,
}

impl TickReport {
    /// Returns true if any category returned work.
    pub fn had_work(&self) -> bool {
        self.claimed > 0
    }
}

struct CachedReference {
    data: ReferenceData,
    loaded_at: Instant,
}

/// Drives the pipeline on a fixed interval until shut down.
///
/// A tick refreshes reference data when stale, claims every configured
/// category, routes the claimed events, and sweeps expired alert grace
/// windows. Ticks that found work are followed immediately by another.
pub struct PollLoop<E, R, S>
where
    E: EventStore,
    R: ReferenceStore,
    S: ProjectionStore,
{
    events: E,
    references: R,
    router: EventRouter<S>,
    categories: Vec<EventCategory>,
    settings: PollSettings,
    reference: Option<CachedReference>,
}

impl<E, R, S> PollLoop<E, R, S>
where
    E: EventStore,
    R: ReferenceStore,
    S: ProjectionStore,
{
    /// Creates a loop claiming exactly the categories the router handles.
    pub fn new(events: E, references: R, router: EventRouter<S>, settings: PollSettings) -> Self {
        let categories = router.categories();
        Self {
            events,
            references,
            router,
            categories,
            settings,
            reference: None,
        }
    }

    /// Also claims these categories, even without a handler.
    ///
    /// Their events are consumed and reported as unknown.
    pub fn with_extra_categories(mut self, extra: impl IntoIterator<Item = EventCategory>) -> Self {
        for category in extra {
            if !self.categories.contains(&category) {
                self.categories.push(category);
            }
        }
        self.categories.sort();
        self
    }

    /// Returns the categories claimed each tick.
    pub fn categories(&self) -> &[EventCategory] {
        &self.categories
    }

    pub fn router(&self) -> &EventRouter<S> {
        &self.router
    }

    /// Runs the loop on its own task.
    pub fn spawn(self) -> RunningLoop
    where
        E: 'static,
        R: 'static,
        S: 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let worker = tokio::spawn(self.run(rx));
        RunningLoop { shutdown, worker }
    }

    /// Runs ticks until `shutdown` turns true or its sender is dropped.
    ///
    /// The signal is only checked between ticks, so a tick in progress
    /// always finishes its applies.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            categories = ?self.categories,
            poll_interval = ?self.settings.poll_interval,
            settle_age = ?self.settings.settle_age,
            "poll loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.tick().await;
            if report.had_work() {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("poll loop stopped");
    }

    /// Runs a single tick.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        if !self.refresh_reference().await {
            return report;
        }

        let now = Utc::now();
        let watermark = now
            .checked_sub_signed(to_delta(self.settings.settle_age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let events = &self.events;
        let claims = join_all(self.categories.iter().map(|&category| async move {
            (category, events.claim(category, watermark).await)
        }))
        .await;

        let mut batch: Vec<RawEvent> = Vec::new();
        for (category, claimed) in claims {
            match claimed {
                Ok(events) => batch.extend(events),
                Err(err) => {
                    if err.is_transient() {
                        tracing::warn!(%category, error = %err, "claim failed, skipping category this tick");
                    } else {
                        tracing::error!(%category, error = %err, "claim failed, skipping category this tick");
                    }
                    metrics::counter!("controller_store_unavailable_total", "operation" => "claim")
                        .increment(1);
                    report.skipped.push(category);
                }
            }
        }
        report.claimed = batch.len();

        if !batch.is_empty() {
            let Some(reference) = self.reference.as_ref() else {
                return report;
            };
            let routed = self.router.route(batch, &reference.data).await;
            report.blips_written = routed.blips_written();
            report.failed = routed.failed();
        }

        report.alerts_expired = self.sweep_alerts().await;
        report.population = self.record_population().await;
        self.record_buffer_depth().await;

        metrics::histogram!("controller_tick_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if report.had_work() {
            tracing::info!(
                claimed = report.claimed,
                blips = report.blips_written,
                failed = ?report.failed,
                "tick processed events"
            );
        }
        report
    }

    /// Makes sure a usable reference snapshot is cached.
    ///
    /// A failed refresh keeps serving the previous snapshot. Returns false
    /// only if there has never been one.
    async fn refresh_reference(&mut self) -> bool {
        let fresh = self
            .reference
            .as_ref()
            .is_some_and(|cached| cached.loaded_at.elapsed() < self.settings.reference_ttl);
        if fresh {
            return true;
        }

        match self.references.load_reference().await {
            Ok(data) => {
                if data.tracked_servers().is_empty() {
                    tracing::warn!("no servers have tracking enabled, all events will be dropped");
                }
                self.reference = Some(CachedReference {
                    data,
                    loaded_at: Instant::now(),
                });
                true
            }
            Err(err) => {
                metrics::counter!("controller_store_unavailable_total", "operation" => "load_reference")
                    .increment(1);
                if self.reference.is_some() {
                    tracing::warn!(error = %err, "reference refresh failed, using previous snapshot");
                    true
                } else {
                    tracing::warn!(error = %err, "reference data unavailable, skipping tick");
                    false
                }
            }
        }
    }

    async fn sweep_alerts(&self) -> u64 {
        if !self.router.categories().contains(&EventCategory::ContinentAlert) {
            return 0;
        }
        let grace = to_delta(self.settings.alert_grace);
        match self.router.store().expire_alerts(Utc::now(), grace).await {
            Ok(expired) => expired,
            Err(err) => {
                tracing::warn!(error = %err, "alert expiry sweep failed");
                metrics::counter!("controller_store_unavailable_total", "operation" => "expire_alerts")
                    .increment(1);
                0
            }
        }
    }

    async fn record_population(&self) -> BTreeMap<ServerId, u32> {
        let mut totals = BTreeMap::new();
        if !self.router.categories().contains(&EventCategory::PlayerBlip) {
            return totals;
        }
        let Some(reference) = self.reference.as_ref() else {
            return totals;
        };

        let as_of = Utc::now();
        let window = to_delta(self.settings.presence_window);
        for server_id in reference.data.tracked_servers() {
            match self.router.store().population_at(server_id, as_of, window).await {
                Ok(snapshot) => {
                    metrics::gauge!("controller_population_players", "server" => server_id.to_string())
                        .set(f64::from(snapshot.total));
                    totals.insert(server_id, snapshot.total);
                }
                Err(err) => {
                    tracing::warn!(server = %server_id, error = %err, "population read failed");
                    metrics::counter!("controller_store_unavailable_total", "operation" => "population_at")
                        .increment(1);
                }
            }
        }
        totals
    }

    async fn record_buffer_depth(&self) {
        for &category in &self.categories {
            match self.events.buffered(category).await {
                Ok(depth) => {
                    metrics::gauge!("controller_buffered_events", "category" => category.as_str())
                        .set(depth as f64);
                }
                Err(err) => {
                    tracing::debug!(%category, error = %err, "could not read buffer depth");
                }
            }
        }
    }
}

/// A poll loop started with [`PollLoop::spawn`].
pub struct RunningLoop {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl RunningLoop {
    /// Signals shutdown and waits for the tick in progress to finish.
    ///
    /// Returns true if the loop was still running when signalled and then
    /// stopped cleanly.
    pub async fn stop(self) -> bool {
        let delivered = self.shutdown.send(true).is_ok();
        if !delivered {
            tracing::debug!("poll loop had already exited before shutdown was signalled");
        }
        match self.worker.await {
            Ok(()) => delivered,
            Err(err) => {
                tracing::error!(error = %err, "poll loop terminated abnormally");
                false
            }
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
