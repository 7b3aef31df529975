//! Simulated card backend.
//!
//! In-memory implementation of [`CardAdapter`] for development and tests:
//! a single card with a serial number, event counter, balance, and key id,
//! plus per-operation fault injection. State lives behind a shared handle so
//! tests (and a dev console on another thread) can insert/remove the card or
//! inject a status word even while the adapter is owned by the worker thread.
//!
//! The seal MAC is a deterministic byte mix — real MACs come from the vendor
//! library, and their cryptography is out of scope here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::card::adapter::{CardAdapter, CardFault, CardResult, SealOutput};
use crate::card::status::NativeStatus;

// ---------------------------------------------------------------------------
// Simulated operations
// ---------------------------------------------------------------------------

/// One capability of the simulated library, used as a fault-injection key and
/// recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    IsCardIn,
    Initialize,
    Finalize,
    BeginTransaction,
    EndTransaction,
    ReadSerial,
    ReadCounter,
    ReadBalance,
    ReadKeyId,
    ComputeSeal,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SimState {
    card_present: bool,
    slot: u8,
    /// Probes at or beyond this index fail: no reader is attached there.
    reader_count: u8,
    /// Artificial latency per presence probe, for exercising timeouts.
    probe_delay: Option<Duration>,
    serial: [u8; 8],
    counter: u32,
    balance: u32,
    key_id: u8,
    initialized: bool,
    in_transaction: bool,
    fail_next: HashMap<SimOp, NativeStatus>,
    calls: Vec<SimOp>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            card_present: true,
            slot: 0,
            reader_count: 16,
            probe_delay: None,
            serial: [0x05, 0x1A, 0x00, 0x42, 0x9C, 0x17, 0x00, 0x03],
            counter: 0,
            balance: 500_000,
            key_id: 0x01,
            initialized: false,
            in_transaction: false,
            fail_next: HashMap::new(),
            calls: Vec::new(),
        }
    }
}

/// Control handle over a [`SimulatedCard`]'s state.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert the card into `slot`.
    pub fn insert_card(&self, slot: u8) {
        let mut state = self.lock();
        state.card_present = true;
        state.slot = slot;
    }

    /// Remove the card from its slot.
    pub fn remove_card(&self) {
        self.lock().card_present = false;
    }

    /// Make the next call to `op` fail with `status`.
    pub fn fail_next(&self, op: SimOp, status: NativeStatus) {
        self.lock().fail_next.insert(op, status);
    }

    /// Number of attached readers; probes at or beyond this index fail.
    pub fn set_reader_count(&self, count: u8) {
        self.lock().reader_count = count;
    }

    /// Stall every presence probe by `delay`, simulating a slow reader.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.lock().probe_delay = Some(delay);
    }

    pub fn counter(&self) -> u32 {
        self.lock().counter
    }

    pub fn balance(&self) -> u32 {
        self.lock().balance
    }

    /// All operations invoked so far, in order.
    pub fn calls(&self) -> Vec<SimOp> {
        self.lock().calls.clone()
    }

    /// Whether the simulated library currently holds an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Whether the simulated library is initialized.
    pub fn initialized(&self) -> bool {
        self.lock().initialized
    }
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

/// Simulated card adapter. See module docs.
pub struct SimulatedCard {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCard {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Shared control handle, valid after the adapter moves elsewhere.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    /// Record the call and pop any injected fault for it.
    fn enter(state: &mut SimState, op: SimOp) -> CardResult<()> {
        state.calls.push(op);
        match state.fail_next.remove(&op) {
            Some(status) => Err(CardFault::Status(status)),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads require an initialized library and a present card.
    fn check_ready(state: &SimState) -> CardResult<()> {
        if !state.initialized {
            return Err(CardFault::Status(NativeStatus::NOT_INITIALIZED));
        }
        if !state.card_present {
            return Err(CardFault::Status(NativeStatus::NO_CARD));
        }
        Ok(())
    }

    /// Deterministic stand-in MAC: mixes serial, timestamp, price, counter.
    fn mix_mac(serial: &[u8; 8], timestamp_bcd: &[u8; 5], price_cents: u32, counter: u32) -> [u8; 8] {
        let mut acc: u64 = 0x517C_C1B7_2722_0A95;
        let price_bytes = price_cents.to_be_bytes();
        let counter_bytes = counter.to_be_bytes();
        let bytes = serial
            .iter()
            .chain(timestamp_bcd.iter())
            .chain(price_bytes.iter())
            .chain(counter_bytes.iter());
        for &b in bytes {
            acc = acc.rotate_left(11) ^ u64::from(b).wrapping_mul(0x0100_0000_01B3);
        }
        acc.to_be_bytes()
    }
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl CardAdapter for SimulatedCard {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_card_in(&mut self, slot: u8) -> CardResult<bool> {
        let delay = {
            let mut state = self.lock();
            Self::enter(&mut state, SimOp::IsCardIn)?;
            state.probe_delay
        };
        if let Some(delay) = delay {
            // Sleep outside the lock so control handles stay usable.
            std::thread::sleep(delay);
        }
        let state = self.lock();
        if slot >= state.reader_count {
            return Err(CardFault::Driver(format!("no reader behind slot {slot}")));
        }
        Ok(state.card_present && state.slot == slot)
    }

    fn initialize(&mut self, slot: u8) -> CardResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::Initialize)?;
        if !state.card_present || state.slot != slot {
            return Err(CardFault::Status(NativeStatus::NO_CARD));
        }
        if state.initialized {
            return Err(CardFault::Status(NativeStatus::ALREADY_INITIALIZED));
        }
        state.initialized = true;
        Ok(())
    }

    fn finalize(&mut self) -> CardResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::Finalize)?;
        if !state.initialized {
            return Err(CardFault::Status(NativeStatus::NOT_INITIALIZED));
        }
        state.initialized = false;
        state.in_transaction = false;
        Ok(())
    }

    fn begin_transaction(&mut self) -> CardResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::BeginTransaction)?;
        if !state.initialized {
            return Err(CardFault::Status(NativeStatus::NOT_INITIALIZED));
        }
        if state.in_transaction {
            return Err(CardFault::Status(NativeStatus::CONTEXT_ERROR));
        }
        state.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self) -> CardResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::EndTransaction)?;
        if !state.in_transaction {
            return Err(CardFault::Status(NativeStatus::CONTEXT_ERROR));
        }
        state.in_transaction = false;
        Ok(())
    }

    fn read_serial(&mut self) -> CardResult<[u8; 8]> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::ReadSerial)?;
        Self::check_ready(&state)?;
        Ok(state.serial)
    }

    fn read_counter(&mut self) -> CardResult<u32> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::ReadCounter)?;
        Self::check_ready(&state)?;
        Ok(state.counter)
    }

    fn read_balance(&mut self) -> CardResult<u32> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::ReadBalance)?;
        Self::check_ready(&state)?;
        Ok(state.balance)
    }

    fn read_key_id(&mut self) -> CardResult<u8> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::ReadKeyId)?;
        Self::check_ready(&state)?;
        Ok(state.key_id)
    }

    fn compute_seal(&mut self, timestamp_bcd: [u8; 5], price_cents: u32) -> CardResult<SealOutput> {
        let mut state = self.lock();
        Self::enter(&mut state, SimOp::ComputeSeal)?;
        Self::check_ready(&state)?;
        state.counter = state.counter.wrapping_add(1);
        state.balance = state.balance.saturating_sub(price_cents);
        Ok(SealOutput {
            serial: state.serial,
            mac: Self::mix_mac(&state.serial, &timestamp_bcd, price_cents, state.counter),
            counter: state.counter,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
