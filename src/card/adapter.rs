//! Card adapter trait and fault model.
//!
//! Defines the [`CardAdapter`] trait that all card backends implement, along
//! with the [`CardFault`] failure model distinguishing vendor status words
//! from driver-level faults (missing library, hung call). The adapter is
//! injectable so the session, transaction, and error logic run unchanged
//! against real hardware, the simulator, or test mocks.

use std::fmt;
use std::time::Duration;

use crate::card::native::NativeCard;
use crate::card::sim::SimulatedCard;
use crate::card::status::NativeStatus;
use crate::card::timed::TimedAdapter;

// ---------------------------------------------------------------------------
// Fault model
// ---------------------------------------------------------------------------

/// Failure of a single adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFault {
    /// The vendor library completed the call with a non-success status word.
    Status(NativeStatus),
    /// The call never completed: missing or unresponsive driver.
    Driver(String),
    /// The call exceeded the configured deadline and was abandoned.
    Timeout { after_ms: u64 },
}

impl CardFault {
    pub fn message(&self) -> String {
        match self {
            CardFault::Status(status) => status.message(),
            CardFault::Driver(detail) => detail.clone(),
            CardFault::Timeout { after_ms } => {
                format!("card library call timed out after {after_ms}ms")
            }
        }
    }
}

impl fmt::Display for CardFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardFault::Status(status) => write!(f, "{status}"),
            _ => write!(f, "{}", self.message()),
        }
    }
}

pub type CardResult<T> = Result<T, CardFault>;

// ---------------------------------------------------------------------------
// Seal output
// ---------------------------------------------------------------------------

/// Raw output of a compute-seal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealOutput {
    pub serial: [u8; 8],
    pub mac: [u8; 8],
    pub counter: u32,
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Capability set of the vendor fiscal smart-card library.
///
/// The library is stateful and non-reentrant: callers must initialize a slot
/// before any card operation, bracket card access in begin/end transaction,
/// and never issue concurrent calls. The bridge enforces that discipline; an
/// adapter only has to translate each capability to its backend.
pub trait CardAdapter: Send {
    /// Backend name (for logging/display).
    fn name(&self) -> &str;

    /// Whether a card is present in `slot`. An `Err` means the probe itself
    /// failed (no reader behind this index, driver fault), not mere absence.
    fn is_card_in(&mut self, slot: u8) -> CardResult<bool>;

    /// Initialize the library against the card in `slot`.
    fn initialize(&mut self, slot: u8) -> CardResult<()>;

    /// Release the library's card connection.
    fn finalize(&mut self) -> CardResult<()>;

    /// Open an exclusive card transaction.
    fn begin_transaction(&mut self) -> CardResult<()>;

    /// Close the current card transaction.
    fn end_transaction(&mut self) -> CardResult<()>;

    /// Card serial number, 8 bytes.
    fn read_serial(&mut self) -> CardResult<[u8; 8]>;

    /// Fiscal event counter.
    fn read_counter(&mut self) -> CardResult<u32>;

    /// Remaining balance in minor currency units.
    fn read_balance(&mut self) -> CardResult<u32>;

    /// Identifier of the active sealing key.
    fn read_key_id(&mut self) -> CardResult<u8>;

    /// Compute a fiscal seal for a BCD-encoded timestamp and a price in
    /// minor units.
    fn compute_seal(&mut self, timestamp_bcd: [u8; 5], price_cents: u32) -> CardResult<SealOutput>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create the configured adapter backend, wrapped in the per-call timeout
/// boundary.
pub fn create_adapter(kind: &str, call_timeout: Duration) -> Result<Box<dyn CardAdapter>, String> {
    let inner: Box<dyn CardAdapter> = match kind {
        "simulated" => Box::new(SimulatedCard::new()),
        "native" => Box::new(NativeCard::new()),
        other => return Err(format!("Unknown adapter kind: {other}")),
    };
    let timed = TimedAdapter::spawn(inner, call_timeout)?;
    Ok(Box::new(timed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
