//! Native vendor-library backend — placeholder.
//!
//! Binding the real vendor DLL requires platform-specific loading and the
//! proprietary header set, which ship separately from this crate. This
//! placeholder returns clear driver errors while that binding is wired up;
//! run with `BRIDGE_ADAPTER=simulated` in the meantime.

use crate::card::adapter::{CardAdapter, CardFault, CardResult, SealOutput};

/// Placeholder for the real vendor-library binding.
pub struct NativeCard;

impl NativeCard {
    pub fn new() -> Self {
        Self
    }

    fn unavailable<T>() -> CardResult<T> {
        Err(CardFault::Driver(
            "vendor card library binding not available in this build".into(),
        ))
    }
}

impl Default for NativeCard {
    fn default() -> Self {
        Self::new()
    }
}

impl CardAdapter for NativeCard {
    fn name(&self) -> &str {
        "native"
    }

    fn is_card_in(&mut self, _slot: u8) -> CardResult<bool> {
        Self::unavailable()
    }

    fn initialize(&mut self, _slot: u8) -> CardResult<()> {
        Self::unavailable()
    }

    fn finalize(&mut self) -> CardResult<()> {
        Self::unavailable()
    }

    fn begin_transaction(&mut self) -> CardResult<()> {
        Self::unavailable()
    }

    fn end_transaction(&mut self) -> CardResult<()> {
        Self::unavailable()
    }

    fn read_serial(&mut self) -> CardResult<[u8; 8]> {
        Self::unavailable()
    }

    fn read_counter(&mut self) -> CardResult<u32> {
        Self::unavailable()
    }

    fn read_balance(&mut self) -> CardResult<u32> {
        Self::unavailable()
    }

    fn read_key_id(&mut self) -> CardResult<u8> {
        Self::unavailable()
    }

    fn compute_seal(&mut self, _timestamp_bcd: [u8; 5], _price_cents: u32) -> CardResult<SealOutput> {
        Self::unavailable()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_call_reports_driver_fault() {
        let mut card = NativeCard::new();
        assert!(matches!(card.is_card_in(0), Err(CardFault::Driver(_))));
        assert!(matches!(card.initialize(0), Err(CardFault::Driver(_))));
        assert!(matches!(card.read_serial(), Err(CardFault::Driver(_))));
        assert!(matches!(
            card.compute_seal([0; 5], 100),
            Err(CardFault::Driver(_))
        ));
    }
}
