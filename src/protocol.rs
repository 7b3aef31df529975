//! Wire protocol: request parsing and response envelopes.
//!
//! One request per line on stdin, one JSON response per line on stdout.
//! Requests are JSON objects tagged by a `command` field and parsed through a
//! single serde schema; there is no secondary framing. Responses always carry
//! `"success"`; failures add the translated `"error"` text and a `"kind"`
//! taxonomy tag.

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::BridgeError;

/// Render format for timestamps in responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

// ---------------------------------------------------------------------------
// Command envelope
// ---------------------------------------------------------------------------

/// A single request from the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Status,
    CheckReader,
    ReadCard,
    ComputeSeal {
        /// Price in decimal currency units (e.g. 12.50).
        price: f64,
        /// Optional timestamp; defaults to now, minute precision.
        #[serde(default)]
        timestamp: Option<String>,
    },
    Exit,
}

/// Parse one input line into a [`Command`].
pub fn parse_line(line: &str) -> Result<Command, BridgeError> {
    serde_json::from_str(line)
        .map_err(|e| BridgeError::Protocol(format!("unrecognized request: {e}")))
}

// ---------------------------------------------------------------------------
// Seal request / result
// ---------------------------------------------------------------------------

/// Validated input for a compute-seal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealRequest {
    pub price_cents: u32,
    pub timestamp: NaiveDateTime,
}

impl SealRequest {
    /// Build from the raw payload: converts the decimal price to minor
    /// units and parses or defaults the timestamp.
    pub fn new(price: f64, timestamp: Option<&str>) -> Result<Self, BridgeError> {
        if !price.is_finite() || price < 0.0 {
            return Err(BridgeError::Protocol(format!(
                "price must be a non-negative amount, got {price}"
            )));
        }
        let cents = (price * 100.0).round();
        if cents > f64::from(u32::MAX) {
            return Err(BridgeError::Protocol(format!("price out of range: {price}")));
        }
        let timestamp = match timestamp {
            Some(raw) => parse_timestamp(raw)?,
            None => now_to_minute(),
        };
        Ok(Self {
            price_cents: cents as u32,
            timestamp,
        })
    }
}

/// One fiscal seal event, as returned to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealResult {
    pub serial: [u8; 8],
    pub mac: [u8; 8],
    pub counter: u32,
    pub timestamp: NaiveDateTime,
    pub price_cents: u32,
}

impl SealResult {
    pub fn to_response(&self) -> Value {
        json!({
            "success": true,
            "serialNumber": hex::encode_upper(self.serial),
            "mac": hex::encode_upper(self.mac),
            "counter": self.counter,
            "timestamp": self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            "price": f64::from(self.price_cents) / 100.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Accepts `YYYY-MM-DD HH:MM[:SS]`, the `T`-separated variants, or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, BridgeError> {
    let raw = raw.trim();
    for format in [
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_local());
    }
    Err(BridgeError::Protocol(format!("invalid timestamp: {raw}")))
}

/// Current local time truncated to minute precision.
fn now_to_minute() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_second(0)
        .and_then(|ts| ts.with_nanosecond(0))
        .unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

/// Failure response for any bridge error.
pub fn failure(error: &BridgeError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "kind": error.kind(),
    })
}

/// Startup banner emitted once before the read loop, so the host can
/// synchronize on bridge readiness.
pub fn ready_banner() -> Value {
    json!({
        "event": "ready",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
