//! TTL envelopes around stored payloads.
//!
//! An envelope records when a payload was written and how long the writer
//! intended it to live. Freshness is decided against a caller-supplied
//! duration when one is given, since readers may use a different TTL than
//! the writer did.
//!
//! # Stored Format
//!
//! ```json
//! { "payload": <any>, "writtenAt": 1718000000000, "ttlMs": 30000 }
//! ```
//!
//! `writtenAt` is written as epoch milliseconds. Decoding also accepts an
//! RFC 3339 string. A missing or unparsable `writtenAt` does not fail
//! decoding; the envelope simply reports itself as expired.

use std::time::Duration;

use chrono::DateTime;
use marketcache_core::{Clock, Payload, Timestamp, TtlMs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A payload plus its write time and intended lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlEnvelope {
    payload: Payload,
    /// `None` when the stored timestamp was missing or malformed.
    written_at: Option<Timestamp>,
    ttl_ms: TtlMs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredEnvelope<'a> {
    payload: &'a Payload,
    written_at: Option<i64>,
    ttl_ms: TtlMs,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    payload: Value,
    #[serde(default)]
    written_at: Option<Value>,
    #[serde(default)]
    ttl_ms: Option<Value>,
}

impl TtlEnvelope {
    /// Wrap a payload, stamping it with the clock's current time.
    pub fn wrap(payload: Payload, ttl_ms: TtlMs, clock: &dyn Clock) -> Self {
        Self::wrap_at(payload, ttl_ms, clock.now())
    }

    /// Wrap a payload with an explicit write time.
    pub fn wrap_at(payload: Payload, ttl_ms: TtlMs, written_at: Timestamp) -> Self {
        Self {
            payload,
            written_at: Some(written_at),
            ttl_ms,
        }
    }

    /// The wrapped payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the envelope and return the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// When the payload was written, if the stored timestamp was readable.
    pub fn written_at(&self) -> Option<Timestamp> {
        self.written_at
    }

    /// Lifetime the writer asked for.
    pub fn ttl_ms(&self) -> TtlMs {
        self.ttl_ms
    }

    /// Time since the payload was written, or `None` without a timestamp.
    pub fn age(&self, clock: &dyn Clock) -> Option<Duration> {
        self.written_at.map(|at| clock.elapsed_since(at))
    }

    /// Whether the payload is stale.
    ///
    /// `ttl_override` replaces the stored lifetime when present. A record is
    /// fresh only while `age < ttl`; a missing timestamp is always expired.
    pub fn is_expired(&self, ttl_override: Option<TtlMs>, clock: &dyn Clock) -> bool {
        let ttl = Duration::from_millis(ttl_override.unwrap_or(self.ttl_ms));
        match self.age(clock) {
            Some(age) => age >= ttl,
            None => true,
        }
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&StoredEnvelope {
            payload: &self.payload,
            written_at: self.written_at.map(|at| at.timestamp_millis()),
            ttl_ms: self.ttl_ms,
        })
    }

    /// Deserialize from storage.
    ///
    /// Fails only when the bytes are not a JSON object with a `payload`
    /// field. Bad `writtenAt` / `ttlMs` values decode to an expired envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        Ok(Self {
            payload: raw.payload,
            written_at: raw.written_at.as_ref().and_then(parse_timestamp),
            ttl_ms: raw.ttl_ms.as_ref().and_then(parse_ttl).unwrap_or(0),
        })
    }
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(millis) = s.parse::<i64>() {
                return DateTime::from_timestamp_millis(millis);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc))
        }
        _ => None,
    }
}

fn parse_ttl(value: &Value) -> Option<TtlMs> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
