//! Card session state and lifecycle.
//!
//! [`SessionManager`] owns the adapter and the [`CardSession`] record — which
//! slot is active, whether the library is initialized, whether a transaction
//! is open. All mutation goes through its operations; the dispatcher holds
//! the manager behind a Mutex so one command at a time touches the card.
//!
//! The session never assumes hardware state survives a card removal: any
//! absence observed for the tracked slot resets `initialized`, forcing a
//! re-initialize on the next operation.

use tracing::{debug, info, warn};

use crate::card::adapter::{CardAdapter, CardFault};
use crate::card::status::StatusKind;
use crate::card::transaction::TransactionGuard;
use crate::error::BridgeError;

/// Highest slot index probed during a card scan (exclusive).
pub const SLOT_SCAN_LIMIT: u8 = 16;

// ---------------------------------------------------------------------------
// Session record
// ---------------------------------------------------------------------------

/// In-memory record of the active card session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSession {
    pub slot: u8,
    pub initialized: bool,
    pub in_transaction: bool,
}

impl Default for CardSession {
    fn default() -> Self {
        Self {
            slot: 0,
            initialized: false,
            in_transaction: false,
        }
    }
}

/// Outcome of a slot scan.
#[derive(Debug)]
pub enum CardDetection {
    Found { slot: u8 },
    NoCard,
    /// The very first probe failed outright — no reader is attached at all.
    NoReader { fault: CardFault },
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

/// Owns the adapter and the session record. See module docs.
pub struct SessionManager {
    adapter: Box<dyn CardAdapter>,
    session: CardSession,
}

impl SessionManager {
    pub fn new(adapter: Box<dyn CardAdapter>) -> Self {
        Self {
            adapter,
            session: CardSession::default(),
        }
    }

    /// Snapshot of the current session record.
    pub fn session(&self) -> CardSession {
        self.session
    }

    /// Scan slots 0..16 in order and track the first one holding a card.
    ///
    /// A failed probe means no reader exists behind that index: failure on
    /// the first slot reports `NoReader`; failure on a later slot ends the
    /// scan as exhausted.
    pub fn detect_card(&mut self) -> CardDetection {
        for slot in 0..SLOT_SCAN_LIMIT {
            match self.adapter.is_card_in(slot) {
                Ok(true) => {
                    debug!(slot, "card present");
                    self.session.slot = slot;
                    return CardDetection::Found { slot };
                }
                Ok(false) => continue,
                Err(fault) if slot == 0 => {
                    warn!(%fault, "presence probe failed on first slot; no reader available");
                    return CardDetection::NoReader { fault };
                }
                Err(fault) => {
                    debug!(slot, %fault, "presence probe failed; scan exhausted");
                    break;
                }
            }
        }
        CardDetection::NoCard
    }

    /// Initialize the library against `slot` unless already initialized.
    ///
    /// Both "ok" and "already initialized" count as success. Idempotent: a
    /// second call without an intervening finalize or card removal performs
    /// no adapter call.
    pub fn ensure_initialized(&mut self, slot: u8) -> Result<(), BridgeError> {
        if self.session.initialized {
            return Ok(());
        }
        self.session.slot = slot;
        match self.adapter.initialize(slot) {
            Ok(()) => {
                self.session.initialized = true;
                info!(slot, "card session initialized");
                Ok(())
            }
            Err(CardFault::Status(status)) if status.kind() == StatusKind::AlreadyInitialized => {
                self.session.initialized = true;
                debug!(slot, "library already initialized");
                Ok(())
            }
            Err(fault) => {
                self.session.initialized = false;
                Err(BridgeError::Initialization(format!(
                    "initialization failed: {}",
                    fault.message()
                )))
            }
        }
    }

    /// Confirm the card is still in the tracked slot.
    ///
    /// Absence (or a failed probe) resets `initialized` so the next
    /// operation re-initializes from scratch.
    pub fn verify_present(&mut self) -> Result<(), BridgeError> {
        match self.adapter.is_card_in(self.session.slot) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(slot = self.session.slot, "card removed");
                self.session.initialized = false;
                Err(BridgeError::Card("no card present".into()))
            }
            Err(fault) => {
                warn!(slot = self.session.slot, %fault, "presence check failed");
                self.session.initialized = false;
                Err(BridgeError::Card(format!(
                    "card presence check failed: {}",
                    fault.message()
                )))
            }
        }
    }

    /// Open a scoped card transaction; ended when the guard drops.
    pub fn transaction(&mut self) -> TransactionGuard<'_> {
        TransactionGuard::begin(self.adapter.as_mut(), &mut self.session)
    }

    /// End any open transaction and finalize the library. Safe to call more
    /// than once; each step runs at most once per session.
    pub fn cleanup(&mut self) {
        if self.session.in_transaction {
            if let Err(fault) = self.adapter.end_transaction() {
                warn!(%fault, "end-transaction failed during cleanup");
            }
            self.session.in_transaction = false;
        }
        if self.session.initialized {
            match self.adapter.finalize() {
                Ok(()) => info!("card session finalized"),
                Err(fault) => warn!(%fault, "finalize failed during cleanup"),
            }
            self.session.initialized = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
