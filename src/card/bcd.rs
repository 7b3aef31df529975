//! Binary-coded-decimal timestamp encoding.
//!
//! The vendor library takes seal timestamps as 5 BCD bytes (YYMMDDHHmm), two
//! decimal digits per byte in the high/low nibbles. The library only ever
//! receives this form, so there is no decoder.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Encode a timestamp as 5 BCD bytes: year-mod-100, month, day, hour, minute.
pub fn encode_timestamp(ts: &NaiveDateTime) -> [u8; 5] {
    [
        bcd_byte(ts.year().rem_euclid(100) as u8),
        bcd_byte(ts.month() as u8),
        bcd_byte(ts.day() as u8),
        bcd_byte(ts.hour() as u8),
        bcd_byte(ts.minute() as u8),
    ]
}

/// Pack a value in 0..=99 into one BCD byte (e.g. 24 → 0x24).
fn bcd_byte(value: u8) -> u8 {
    debug_assert!(value < 100);
    (value / 10) << 4 | (value % 10)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
