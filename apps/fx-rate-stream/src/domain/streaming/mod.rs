//! Streaming Payload Types
//!
//! Outbound messages pushed to subscribers: rate views (ticks and catch-up
//! snapshots), error replies, and status acknowledgments. These are the
//! canonical wire shapes; the transport only ever sees their serialized form.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::instrument::{InstrumentCatalog, InstrumentId, InstrumentMetadata, RateBoard};

/// A serialized outbound message, shared between all of its recipients.
pub type OutboundFrame = Arc<str>;

// =============================================================================
// Tick
// =============================================================================

/// One instrument's value at one point in a broadcast cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument the value belongs to.
    pub instrument: InstrumentId,
    /// New reference value (`None` if the instrument has no value).
    pub value: Option<Decimal>,
    /// When the value was produced.
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a tick stamped with the current time.
    #[must_use]
    pub fn now(instrument: InstrumentId, value: Option<Decimal>) -> Self {
        Self {
            instrument,
            value,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Rate View
// =============================================================================

/// A single instrument's entry in a rate view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateEntry {
    /// Current value, `null` if the instrument has none.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub rate: Option<Decimal>,
    /// Static metadata, flattened alongside the rate.
    #[serde(flatten)]
    pub metadata: InstrumentMetadata,
}

/// Rate view payload, used both for ticks and for catch-up replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatesPayload {
    /// Always `true`.
    pub success: bool,
    /// Base currency.
    pub base: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Entries keyed by instrument.
    pub rates: BTreeMap<InstrumentId, RateEntry>,
    /// Calendar date of `timestamp` (UTC), `YYYY-MM-DD`.
    pub date: String,
}

impl RatesPayload {
    fn empty(base: &str, at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            base: base.to_string(),
            timestamp: at.timestamp_millis(),
            rates: BTreeMap::new(),
            date: at.format("%Y-%m-%d").to_string(),
        }
    }

    /// Payload carrying a single tick.
    #[must_use]
    pub fn from_tick(catalog: &InstrumentCatalog, tick: &Tick) -> Self {
        let mut payload = Self::empty(catalog.base(), tick.timestamp);
        if let Some(metadata) = catalog.metadata(&tick.instrument) {
            payload.rates.insert(
                tick.instrument.clone(),
                RateEntry {
                    rate: tick.value,
                    metadata: metadata.clone(),
                },
            );
        }
        payload
    }

    /// Payload with the board's current value for each requested instrument.
    ///
    /// Instruments not in the catalog are skipped.
    #[must_use]
    pub fn snapshot<'a>(
        catalog: &InstrumentCatalog,
        board: &RateBoard,
        instruments: impl IntoIterator<Item = &'a InstrumentId>,
    ) -> Self {
        let mut payload = Self::empty(catalog.base(), Utc::now());
        for id in instruments {
            if let Some(metadata) = catalog.metadata(id) {
                payload.rates.insert(
                    id.clone(),
                    RateEntry {
                        rate: board.current(id),
                        metadata: metadata.clone(),
                    },
                );
            }
        }
        payload
    }
}

// =============================================================================
// Replies
// =============================================================================

/// `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    /// Human-readable message.
    pub error: String,
}

impl ErrorReply {
    /// Create an error reply.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// `{"status": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReply {
    /// Status keyword.
    pub status: &'static str,
}

impl StatusReply {
    /// Acknowledgment of an unsubscribe request.
    pub const UNSUBSCRIBED: Self = Self {
        status: "unsubscribed",
    };
}

/// Serialize an outbound message into a shareable frame.
///
/// # Errors
///
/// Returns the underlying `serde_json` error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<OutboundFrame, serde_json::Error> {
    serde_json::to_string(message).map(Arc::from)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::{Value, json};

    use super::*;

    fn id(code: &str) -> InstrumentId {
        InstrumentId::parse(code).unwrap()
    }

    #[test]
    fn tick_payload_shape() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let tick = Tick {
            instrument: id("ZAR"),
            value: Some(Decimal::new(17_512_345, 6)),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        };

        let value: Value =
            serde_json::from_str(&encode(&RatesPayload::from_tick(&catalog, &tick)).unwrap())
                .unwrap();

        assert_eq!(
            value,
            json!({
                "success": true,
                "base": "USD",
                "timestamp": 1_773_480_413_000_i64,
                "rates": {
                    "ZAR": {
                        "rate": 17.512345,
                        "name": "South African Rand",
                        "country": "South Africa",
                        "region": "Southern Africa"
                    }
                },
                "date": "2026-03-14"
            })
        );
    }

    #[test]
    fn missing_value_serializes_as_null() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let tick = Tick::now(id("MRO"), None);

        let value: Value =
            serde_json::from_str(&encode(&RatesPayload::from_tick(&catalog, &tick)).unwrap())
                .unwrap();

        assert!(value["rates"]["MRO"]["rate"].is_null());
        assert_eq!(value["rates"]["MRO"]["country"], "Mauritania");
    }

    #[test]
    fn snapshot_uses_board_values_and_skips_unknown() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let board = RateBoard::seeded(&catalog);
        board.publish(&id("NGN"), Some(Decimal::new(1_500_250_000, 6)));

        let payload = RatesPayload::snapshot(&catalog, &board, &[id("NGN"), id("XXX")]);

        assert_eq!(payload.rates.len(), 1);
        assert_eq!(
            payload.rates[&id("NGN")].rate,
            Some(Decimal::new(1_500_250_000, 6))
        );
    }

    #[test]
    fn replies_serialize() {
        assert_eq!(
            &*encode(&ErrorReply::new("Invalid JSON format")).unwrap(),
            r#"{"error":"Invalid JSON format"}"#
        );
        assert_eq!(
            &*encode(&StatusReply::UNSUBSCRIBED).unwrap(),
            r#"{"status":"unsubscribed"}"#
        );
    }
}
