use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventCategory, Faction};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    AlertPhase, Base, BaseControl, ContinentAlert, EventPayload, EventStoreError, PlayerBlip,
    RawEvent, ReferenceData, Result, TrackedServer,
    error::with_deadline,
    reference::ReferenceStore,
    store::EventStore,
};

/// Deadline applied to every store call unless configured otherwise.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL-backed event buffer.
///
/// Each category has its own buffer table. A claim is a single
/// `DELETE … RETURNING` statement, so removal and read are one atomic step.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the deadline applied to every store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn claim_sql(category: EventCategory) -> &'static str {
        match category {
            EventCategory::BaseControl => {
                r#"
                WITH claimed AS (
                    DELETE FROM base_control_buffer
                    WHERE timestamp < $1
                    RETURNING seq, timestamp, server_id, continent_id,
                              base_id, old_faction_id, new_faction_id
                )
                SELECT * FROM claimed ORDER BY timestamp ASC, seq ASC
                "#
            }
            EventCategory::PlayerBlip => {
                r#"
                WITH claimed AS (
                    DELETE FROM player_blip_buffer
                    WHERE timestamp < $1
                    RETURNING seq, timestamp, server_id, continent_id, player_id, base_id
                )
                SELECT * FROM claimed ORDER BY timestamp ASC, seq ASC
                "#
            }
            EventCategory::ContinentAlert => {
                r#"
                WITH claimed AS (
                    DELETE FROM continent_alert_buffer
                    WHERE timestamp < $1
                    RETURNING seq, timestamp, server_id, continent_id, alert_id, phase
                )
                SELECT * FROM claimed ORDER BY timestamp ASC, seq ASC
                "#
            }
        }
    }

    fn buffer_table(category: EventCategory) -> &'static str {
        match category {
            EventCategory::BaseControl => "base_control_buffer",
            EventCategory::PlayerBlip => "player_blip_buffer",
            EventCategory::ContinentAlert => "continent_alert_buffer",
        }
    }

    fn row_to_event(category: EventCategory, row: &PgRow) -> std::result::Result<RawEvent, String> {
        let payload = match category {
            EventCategory::BaseControl => {
                let old: i16 = row.try_get("old_faction_id").map_err(|e| e.to_string())?;
                let new: i16 = row.try_get("new_faction_id").map_err(|e| e.to_string())?;
                EventPayload::BaseControl(BaseControl {
                    base_id: row
                        .try_get::<i32, _>("base_id")
                        .map_err(|e| e.to_string())?
                        .into(),
                    old_faction: Faction::try_from(old).map_err(|e| e.to_string())?,
                    new_faction: Faction::try_from(new).map_err(|e| e.to_string())?,
                })
            }
            EventCategory::PlayerBlip => EventPayload::PlayerBlip(PlayerBlip {
                player_id: row
                    .try_get::<i64, _>("player_id")
                    .map_err(|e| e.to_string())?
                    .into(),
                base_id: row
                    .try_get::<i32, _>("base_id")
                    .map_err(|e| e.to_string())?
                    .into(),
            }),
            EventCategory::ContinentAlert => {
                let phase: String = row.try_get("phase").map_err(|e| e.to_string())?;
                EventPayload::ContinentAlert(ContinentAlert {
                    alert_id: row
                        .try_get::<i32, _>("alert_id")
                        .map_err(|e| e.to_string())?
                        .into(),
                    phase: phase.parse::<AlertPhase>()?,
                })
            }
        };

        Ok(RawEvent {
            sequence: row.try_get("seq").map_err(|e| e.to_string())?,
            timestamp: row.try_get("timestamp").map_err(|e| e.to_string())?,
            server_id: row
                .try_get::<i32, _>("server_id")
                .map_err(|e| e.to_string())?
                .into(),
            continent_id: row
                .try_get::<i32, _>("continent_id")
                .map_err(|e| e.to_string())?
                .into(),
            payload,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self), fields(category = %category))]
    async fn claim(
        &self,
        category: EventCategory,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>> {
        let rows: Vec<PgRow> = with_deadline("claim", self.timeout, async {
            Ok::<_, EventStoreError>(
                sqlx::query(Self::claim_sql(category))
                    .bind(watermark)
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::with_capacity(rows.len());
        let mut failed: Vec<String> = Vec::new();
        for row in &rows {
            match Self::row_to_event(category, row) {
                Ok(event) => events.push(event),
                Err(reason) => failed.push(reason),
            }
        }

        if let Some(first) = failed.first() {
            tracing::warn!(
                skipped = failed.len(),
                first = %first,
                "skipped invalid buffer rows"
            );
            metrics::counter!("event_store_malformed_rows_total", "category" => category.as_str())
                .increment(failed.len() as u64);
        }

        tracing::debug!(claimed = events.len(), "claimed events from buffer");
        metrics::counter!("event_store_events_claimed_total", "category" => category.as_str())
            .increment(events.len() as u64);

        Ok(events)
    }

    async fn buffered(&self, category: EventCategory) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::buffer_table(category));
        let count: i64 = with_deadline("buffered", self.timeout, async {
            Ok::<_, EventStoreError>(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
        })
        .await?;
        Ok(count.max(0) as u64)
    }
}

/// PostgreSQL-backed reference tables.
#[derive(Clone)]
pub struct PostgresReferenceStore {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresReferenceStore {
    /// Creates a new PostgreSQL reference store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the deadline applied to every store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReferenceStore for PostgresReferenceStore {
    #[tracing::instrument(skip(self))]
    async fn load_reference(&self) -> Result<ReferenceData> {
        let (server_rows, base_rows) = with_deadline("load_reference", self.timeout, async {
            let servers = sqlx::query(
                r#"
                SELECT id, name, region, tracking_enabled
                FROM server
                ORDER BY id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            let bases = sqlx::query(
                r#"
                SELECT id, name, continent_id, type, map_pos_x, map_pos_y
                FROM base
                ORDER BY id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, EventStoreError>((servers, bases))
        })
        .await?;

        let servers = server_rows
            .iter()
            .map(|row| {
                Ok(TrackedServer {
                    id: row.try_get::<i32, _>("id")?.into(),
                    name: row.try_get("name")?,
                    region: row.try_get("region")?,
                    tracking_enabled: row.try_get("tracking_enabled")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        let bases = base_rows
            .iter()
            .map(|row| {
                Ok(Base {
                    id: row.try_get::<i32, _>("id")?.into(),
                    name: row.try_get("name")?,
                    continent_id: row.try_get::<i32, _>("continent_id")?.into(),
                    base_type: row.try_get("type")?,
                    map_pos_x: row.try_get("map_pos_x")?,
                    map_pos_y: row.try_get("map_pos_y")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        let data = ReferenceData::new(servers, bases);
        tracing::info!(
            servers = data.server_count(),
            bases = data.base_count(),
            "loaded reference data"
        );
        Ok(data)
    }
}
