//! Per-call timeout boundary around a card adapter.
//!
//! The vendor library offers no timeouts: a hung native call would stall the
//! whole command loop forever. [`TimedAdapter`] runs the wrapped adapter on a
//! dedicated worker thread and bounds every call with a deadline. A timed-out
//! call is abandoned (the worker may still be stuck inside the library) and
//! the adapter is treated as wedged: further calls fail fast until the late
//! reply finally arrives and is drained.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::card::adapter::{CardAdapter, CardFault, CardResult, SealOutput};

// ---------------------------------------------------------------------------
// Worker protocol
// ---------------------------------------------------------------------------

enum Call {
    IsCardIn(u8),
    Initialize(u8),
    Finalize,
    BeginTransaction,
    EndTransaction,
    ReadSerial,
    ReadCounter,
    ReadBalance,
    ReadKeyId,
    ComputeSeal([u8; 5], u32),
}

#[derive(Debug)]
enum Reply {
    Unit(CardResult<()>),
    Flag(CardResult<bool>),
    Bytes(CardResult<[u8; 8]>),
    Word(CardResult<u32>),
    Byte(CardResult<u8>),
    Seal(CardResult<SealOutput>),
}

fn worker(mut inner: Box<dyn CardAdapter>, calls: Receiver<Call>, replies: Sender<Reply>) {
    while let Ok(call) = calls.recv() {
        let reply = match call {
            Call::IsCardIn(slot) => Reply::Flag(inner.is_card_in(slot)),
            Call::Initialize(slot) => Reply::Unit(inner.initialize(slot)),
            Call::Finalize => Reply::Unit(inner.finalize()),
            Call::BeginTransaction => Reply::Unit(inner.begin_transaction()),
            Call::EndTransaction => Reply::Unit(inner.end_transaction()),
            Call::ReadSerial => Reply::Bytes(inner.read_serial()),
            Call::ReadCounter => Reply::Word(inner.read_counter()),
            Call::ReadBalance => Reply::Word(inner.read_balance()),
            Call::ReadKeyId => Reply::Byte(inner.read_key_id()),
            Call::ComputeSeal(bcd, cents) => Reply::Seal(inner.compute_seal(bcd, cents)),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Timed adapter
// ---------------------------------------------------------------------------

/// Wraps any [`CardAdapter`] with a per-call deadline. See module docs.
pub struct TimedAdapter {
    name: String,
    calls: Sender<Call>,
    replies: Receiver<Reply>,
    timeout: Duration,
    wedged: bool,
}

impl TimedAdapter {
    /// Move `inner` onto a worker thread and return the timed front-end.
    pub fn spawn(inner: Box<dyn CardAdapter>, timeout: Duration) -> Result<Self, String> {
        let name = format!("{} (timed)", inner.name());
        let (call_tx, call_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        thread::Builder::new()
            .name("card-adapter".into())
            .spawn(move || worker(inner, call_rx, reply_tx))
            .map_err(|e| format!("Failed to spawn card adapter worker: {e}"))?;
        Ok(Self {
            name,
            calls: call_tx,
            replies: reply_rx,
            timeout,
            wedged: false,
        })
    }

    fn call(&mut self, call: Call) -> CardResult<Reply> {
        if self.wedged {
            // A previous call never answered. Its reply, if it ever lands,
            // belongs to that call — drain and discard it before reusing the
            // channel.
            match self.replies.try_recv() {
                Ok(stale) => {
                    debug!(reply = ?stale, "late adapter reply drained");
                    self.wedged = false;
                }
                Err(TryRecvError::Empty) => {
                    return Err(CardFault::Driver(
                        "card adapter busy: previous call still in flight".into(),
                    ));
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(CardFault::Driver("card adapter worker terminated".into()));
                }
            }
        }

        if self.calls.send(call).is_err() {
            return Err(CardFault::Driver("card adapter worker terminated".into()));
        }
        match self.replies.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.wedged = true;
                let after_ms = self.timeout.as_millis() as u64;
                warn!(after_ms, "card adapter call abandoned on deadline");
                Err(CardFault::Timeout { after_ms })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(CardFault::Driver("card adapter worker terminated".into()))
            }
        }
    }
}

fn unexpected<T>(reply: Reply) -> CardResult<T> {
    Err(CardFault::Driver(format!(
        "unexpected adapter reply: {reply:?}"
    )))
}

impl CardAdapter for TimedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_card_in(&mut self, slot: u8) -> CardResult<bool> {
        match self.call(Call::IsCardIn(slot))? {
            Reply::Flag(result) => result,
            other => unexpected(other),
        }
    }

    fn initialize(&mut self, slot: u8) -> CardResult<()> {
        match self.call(Call::Initialize(slot))? {
            Reply::Unit(result) => result,
            other => unexpected(other),
        }
    }

    fn finalize(&mut self) -> CardResult<()> {
        match self.call(Call::Finalize)? {
            Reply::Unit(result) => result,
            other => unexpected(other),
        }
    }

    fn begin_transaction(&mut self) -> CardResult<()> {
        match self.call(Call::BeginTransaction)? {
            Reply::Unit(result) => result,
            other => unexpected(other),
        }
    }

    fn end_transaction(&mut self) -> CardResult<()> {
        match self.call(Call::EndTransaction)? {
            Reply::Unit(result) => result,
            other => unexpected(other),
        }
    }

    fn read_serial(&mut self) -> CardResult<[u8; 8]> {
        match self.call(Call::ReadSerial)? {
            Reply::Bytes(result) => result,
            other => unexpected(other),
        }
    }

    fn read_counter(&mut self) -> CardResult<u32> {
        match self.call(Call::ReadCounter)? {
            Reply::Word(result) => result,
            other => unexpected(other),
        }
    }

    fn read_balance(&mut self) -> CardResult<u32> {
        match self.call(Call::ReadBalance)? {
            Reply::Word(result) => result,
            other => unexpected(other),
        }
    }

    fn read_key_id(&mut self) -> CardResult<u8> {
        match self.call(Call::ReadKeyId)? {
            Reply::Byte(result) => result,
            other => unexpected(other),
        }
    }

    fn compute_seal(&mut self, timestamp_bcd: [u8; 5], price_cents: u32) -> CardResult<SealOutput> {
        match self.call(Call::ComputeSeal(timestamp_bcd, price_cents))? {
            Reply::Seal(result) => result,
            other => unexpected(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::sim::SimulatedCard;

    /// Simulated card whose presence probes stall for `stall`.
    fn slow_card(stall: Duration) -> Box<dyn CardAdapter> {
        let card = SimulatedCard::new();
        card.handle().set_probe_delay(stall);
        Box::new(card)
    }

    #[test]
    fn test_passthrough_within_deadline() {
        let mut timed =
            TimedAdapter::spawn(Box::new(SimulatedCard::new()), Duration::from_secs(2)).unwrap();
        assert!(timed.is_card_in(0).unwrap());
        timed.initialize(0).unwrap();
        assert_eq!(timed.read_counter().unwrap(), 0);
    }

    #[test]
    fn test_deadline_exceeded_yields_timeout() {
        let mut timed =
            TimedAdapter::spawn(slow_card(Duration::from_millis(200)), Duration::from_millis(50))
                .unwrap();
        let err = timed.is_card_in(0).unwrap_err();
        assert!(matches!(err, CardFault::Timeout { .. }));
    }

    #[test]
    fn test_wedged_adapter_fails_fast_then_recovers() {
        let mut timed =
            TimedAdapter::spawn(slow_card(Duration::from_millis(150)), Duration::from_millis(30))
                .unwrap();

        assert!(matches!(
            timed.is_card_in(0).unwrap_err(),
            CardFault::Timeout { .. }
        ));
        // The worker is still inside the stalled probe: fail fast.
        assert!(matches!(
            timed.initialize(0).unwrap_err(),
            CardFault::Driver(_)
        ));

        // Once the stalled call completes, its stale reply is drained and the
        // adapter works again.
        thread::sleep(Duration::from_millis(250));
        timed.initialize(0).unwrap();
        assert_eq!(timed.read_counter().unwrap(), 0);
    }

    #[test]
    fn test_name_marks_timed_wrapper() {
        let timed =
            TimedAdapter::spawn(Box::new(SimulatedCard::new()), Duration::from_secs(1)).unwrap();
        assert_eq!(timed.name(), "simulated (timed)");
    }
}
