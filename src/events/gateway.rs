//! Event Ingestion Gateway
//!
//! Accepts a notification body in any of the three delivered shapes and
//! normalizes it into a sequence of [`LedgerEvent`]s. Partial-failure
//! isolation: one malformed event is logged and dropped, the rest of the
//! batch still flows.

use serde_json::Value;
use tracing::warn;

use super::types::{EventError, LedgerEvent, NotificationBody, RawEvent};

pub struct EventGateway;

impl EventGateway {
    /// Normalize a notification body into ledger events
    ///
    /// Errors only when the top-level body matches none of the accepted
    /// shapes; per-event failures are skipped with a warning.
    pub fn normalize(body: Value) -> Result<Vec<LedgerEvent>, EventError> {
        let parsed: NotificationBody = serde_json::from_value(body)
            .map_err(|e| EventError::Malformed(format!("unrecognized body shape: {}", e)))?;

        let raw_events: Vec<RawEvent> = match parsed {
            NotificationBody::Envelope { events, .. } => events,
            NotificationBody::Array(events) => events,
            NotificationBody::Single(event) => vec![event],
        };

        let mut events = Vec::with_capacity(raw_events.len());
        for raw in &raw_events {
            match LedgerEvent::from_raw(raw) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        transaction_hash = %raw.transaction_hash,
                        error = %e,
                        "Dropping malformed event, batch continues"
                    );
                }
            }
        }

        Ok(events)
    }
}
