//! Screening of claimed events against the reference tables.

use event_store::{EventPayload, RawEvent, ReferenceData};

use crate::{DomainError, Result};

/// Checks that everything an event references exists and is consistent.
pub fn validate(reference: &ReferenceData, event: &RawEvent) -> Result<()> {
    match event.payload {
        EventPayload::BaseControl(_) | EventPayload::PlayerBlip(_) => {
            let Some(base_id) = event.payload.base_id() else {
                return Ok(());
            };
            let base = reference.base(base_id).ok_or(DomainError::UnknownBase {
                sequence: event.sequence,
                base_id,
            })?;
            if base.continent_id != event.continent_id {
                return Err(DomainError::ContinentMismatch {
                    sequence: event.sequence,
                    base_id,
                    reported: event.continent_id,
                    actual: base.continent_id,
                });
            }
            Ok(())
        }
        EventPayload::ContinentAlert(_) => {
            if reference.has_continent(event.continent_id) {
                Ok(())
            } else {
                Err(DomainError::UnknownContinent {
                    sequence: event.sequence,
                    continent_id: event.continent_id,
                })
            }
        }
    }
}

/// A batch split into what may be projected and what may not.
#[derive(Debug, Default)]
pub struct Screened {
    /// Events that passed every check, in their original order.
    pub accepted: Vec<RawEvent>,
    /// Events from servers that are unknown or not tracked.
    pub ineligible: usize,
    pub rejected: Vec<DomainError>,
}

/// Splits a batch into accepted, ineligible, and rejected events.
///
/// Ineligible events are dropped silently (they are expected whenever a
/// server is untracked); rejected ones carry the reason.
pub fn screen(reference: &ReferenceData, events: Vec<RawEvent>) -> Screened {
    let mut screened = Screened::default();
    for event in events {
        if !reference.is_tracked(event.server_id) {
            screened.ineligible += 1;
            continue;
        }
        match validate(reference, &event) {
            Ok(()) => screened.accepted.push(event),
            Err(err) => screened.rejected.push(err),
        }
    }
    screened
}
