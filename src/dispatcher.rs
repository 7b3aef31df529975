//! Command dispatcher: the read-dispatch-respond loop.
//!
//! Reads one request per line, resolves it to a handler, and emits exactly
//! one response line per request, flushed immediately. A single Mutex around
//! the session manager serializes every card-touching command and is held for
//! the full duration of the operation — initialization, transaction
//! bracketing, and all intervening native calls — so the non-reentrant
//! vendor library is never entered twice at once, even if the loop is later
//! made concurrent.
//!
//! Faults never escape a handler: parse failures, card errors, and even
//! panics are converted into structured failure responses. Only a failure of
//! the protocol stream itself ends the process.

use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::card::adapter::CardAdapter;
use crate::card::bcd;
use crate::card::session::{CardDetection, SessionManager};
use crate::error::BridgeError;
use crate::protocol::{self, Command, SealRequest, SealResult};

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Read-dispatch-respond loop over an input and output stream.
pub struct Dispatcher<R, W> {
    input: R,
    output: W,
    manager: Mutex<SessionManager>,
}

impl<R: BufRead, W: Write> Dispatcher<R, W> {
    pub fn new(adapter: Box<dyn CardAdapter>, input: R, output: W) -> Self {
        Self {
            input,
            output,
            manager: Mutex::new(SessionManager::new(adapter)),
        }
    }

    /// Run until EXIT or end of input. Both paths run session cleanup; only
    /// an I/O failure of the streams themselves is returned as an error.
    pub fn run(&mut self) -> io::Result<()> {
        self.emit(protocol::ready_banner())?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = match self.input.read_line(&mut line) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "input stream failed; running session cleanup");
                    self.lock_manager().cleanup();
                    return Err(e);
                }
            };
            if read == 0 {
                info!("input stream closed; running session cleanup");
                self.lock_manager().cleanup();
                break;
            }
            let request = line.trim();
            if request.is_empty() {
                continue;
            }
            debug!(request, "request received");

            let (response, exit) = self.dispatch(request);
            debug!(response = %response, "response emitted");
            if let Err(e) = self.emit(response) {
                warn!(error = %e, "output stream failed; running session cleanup");
                self.lock_manager().cleanup();
                return Err(e);
            }

            if exit {
                info!("exit requested; loop terminated");
                break;
            }
        }
        Ok(())
    }

    /// Produce the single response for one request line, plus whether the
    /// loop should terminate afterwards.
    fn dispatch(&self, request: &str) -> (Value, bool) {
        let command = match protocol::parse_line(request) {
            Ok(command) => command,
            Err(err) => {
                warn!(request, error = %err, "rejected request");
                return (protocol::failure(&err), false);
            }
        };
        let exit = matches!(command, Command::Exit);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(&command)));
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(kind = err.kind(), error = %err, "command failed");
                protocol::failure(&err)
            }
            Err(_) => {
                let err =
                    BridgeError::Internal("unexpected fault while handling command".into());
                error!("handler panicked; reporting internal error");
                protocol::failure(&err)
            }
        };
        (response, exit)
    }

    fn handle(&self, command: &Command) -> Result<Value, BridgeError> {
        // One lock for the whole operation: every native call a command makes
        // happens under it.
        let mut mgr = self.lock_manager();
        match command {
            Command::Status => handle_status(&mgr),
            Command::CheckReader => handle_check_reader(&mut mgr),
            Command::ReadCard => handle_read_card(&mut mgr),
            Command::ComputeSeal { price, timestamp } => {
                handle_compute_seal(&mut mgr, *price, timestamp.as_deref())
            }
            Command::Exit => {
                mgr.cleanup();
                Ok(json!({ "success": true }))
            }
        }
    }

    fn lock_manager(&self) -> MutexGuard<'_, SessionManager> {
        self.manager.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&mut self, response: Value) -> io::Result<()> {
        writeln!(self.output, "{response}")?;
        self.output.flush()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// STATUS: session snapshot, no card I/O.
fn handle_status(mgr: &SessionManager) -> Result<Value, BridgeError> {
    let session = mgr.session();
    Ok(json!({
        "success": true,
        "initialized": session.initialized,
        "inTransaction": session.in_transaction,
        "slot": session.slot,
    }))
}

/// CHECK_READER: scan for a card and initialize against it.
fn handle_check_reader(mgr: &mut SessionManager) -> Result<Value, BridgeError> {
    match mgr.detect_card() {
        CardDetection::NoReader { fault } => Err(BridgeError::Device(format!(
            "no card reader detected: {}",
            fault.message()
        ))),
        CardDetection::NoCard => Ok(json!({
            "success": true,
            "readerConnected": true,
            "cardPresent": false,
            "message": "Reader connected, insert card",
        })),
        CardDetection::Found { slot } => {
            if let Err(err) = mgr.ensure_initialized(slot) {
                let mut response = protocol::failure(&err);
                response["readerConnected"] = true.into();
                response["cardPresent"] = true.into();
                return Ok(response);
            }
            Ok(json!({
                "success": true,
                "readerConnected": true,
                "cardPresent": true,
                "slot": slot,
                "initialized": true,
                "message": "Fiscal card detected",
            }))
        }
    }
}

/// READ_CARD: serial, counter, balance, and key id under one transaction.
fn handle_read_card(mgr: &mut SessionManager) -> Result<Value, BridgeError> {
    mgr.verify_present()?;
    let slot = mgr.session().slot;
    mgr.ensure_initialized(slot)?;

    let mut guard = mgr.transaction();
    let adapter = guard.adapter();

    // The serial number is mandatory; the remaining fields degrade to
    // defaults so a partially readable card still answers.
    let serial = adapter
        .read_serial()
        .map_err(|f| BridgeError::from_fault(&f, BridgeError::Card))?;
    let counter = adapter.read_counter().unwrap_or_else(|fault| {
        warn!(%fault, "counter read failed; defaulting to 0");
        0
    });
    let balance = adapter.read_balance().unwrap_or_else(|fault| {
        warn!(%fault, "balance read failed; defaulting to 0");
        0
    });
    let key_id = adapter.read_key_id().unwrap_or_else(|fault| {
        warn!(%fault, "key id read failed; defaulting to 0");
        0
    });
    drop(guard);

    Ok(json!({
        "success": true,
        "serialNumber": hex::encode_upper(serial),
        "counter": counter,
        "balance": balance,
        "keyId": key_id,
        "slot": slot,
    }))
}

/// COMPUTE_SEAL: one fiscal seal for a priced, timestamped event.
fn handle_compute_seal(
    mgr: &mut SessionManager,
    price: f64,
    timestamp: Option<&str>,
) -> Result<Value, BridgeError> {
    let request = SealRequest::new(price, timestamp)?;
    mgr.verify_present()?;
    let slot = mgr.session().slot;
    mgr.ensure_initialized(slot)?;

    let timestamp_bcd = bcd::encode_timestamp(&request.timestamp);
    debug!(
        bcd = %hex::encode_upper(timestamp_bcd),
        price_cents = request.price_cents,
        "computing seal"
    );

    let mut guard = mgr.transaction();
    let output = guard
        .adapter()
        .compute_seal(timestamp_bcd, request.price_cents)
        .map_err(|f| BridgeError::from_fault(&f, BridgeError::Seal))?;
    drop(guard);

    let result = SealResult {
        serial: output.serial,
        mac: output.mac,
        counter: output.counter,
        timestamp: request.timestamp,
        price_cents: request.price_cents,
    };
    info!(counter = result.counter, "fiscal seal computed");
    Ok(result.to_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::sim::{SimHandle, SimOp, SimulatedCard};
    use crate::card::status::NativeStatus;
    use std::io::Cursor;

    /// Run a full dispatcher session over the given request lines and return
    /// the parsed response lines (ready banner included) plus the sim handle.
    fn run_session(requests: &[&str], configure: impl FnOnce(&SimHandle)) -> (Vec<Value>, SimHandle) {
        let card = SimulatedCard::new();
        let handle = card.handle();
        configure(&handle);

        let input = requests.join("\n");
        let mut dispatcher =
            Dispatcher::new(Box::new(card), Cursor::new(input.into_bytes()), Vec::new());
        dispatcher.run().unwrap();

        let output = String::from_utf8(dispatcher.output).unwrap();
        let lines = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (lines, handle)
    }

    #[test]
    fn test_ready_banner_first() {
        let (lines, _) = run_session(&[], |_| {});
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "ready");
    }

    #[test]
    fn test_one_response_per_request() {
        let (lines, _) = run_session(
            &[r#"{"command":"STATUS"}"#, "junk", r#"{"command":"STATUS"}"#],
            |_| {},
        );
        // Banner + three responses.
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_status_before_any_card_io() {
        let (lines, handle) = run_session(&[r#"{"command":"STATUS"}"#], |_| {});
        let status = &lines[1];
        assert_eq!(status["success"], true);
        assert_eq!(status["initialized"], false);
        assert_eq!(status["inTransaction"], false);
        assert_eq!(status["slot"], 0);
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_unknown_command_touches_no_card_state() {
        let (lines, handle) = run_session(
            &[r#"{"command":"FOO"}"#, r#"{"command":"STATUS"}"#],
            |_| {},
        );
        assert_eq!(lines[1]["success"], false);
        assert_eq!(lines[1]["kind"], "protocol_error");
        assert!(handle.calls().is_empty());
        // Session unchanged.
        assert_eq!(lines[2]["initialized"], false);
        assert_eq!(lines[2]["slot"], 0);
    }

    #[test]
    fn test_check_reader_with_card() {
        let (lines, handle) = run_session(&[r#"{"command":"CHECK_READER"}"#], |h| {
            h.insert_card(2);
        });
        let resp = &lines[1];
        assert_eq!(resp["success"], true);
        assert_eq!(resp["readerConnected"], true);
        assert_eq!(resp["cardPresent"], true);
        assert_eq!(resp["slot"], 2);
        assert_eq!(resp["initialized"], true);
        assert!(resp["message"].is_string());
        assert!(handle.initialized());
    }

    #[test]
    fn test_check_reader_without_card() {
        let (lines, _) = run_session(&[r#"{"command":"CHECK_READER"}"#], |h| {
            h.remove_card();
        });
        let resp = &lines[1];
        assert_eq!(resp["success"], true);
        assert_eq!(resp["readerConnected"], true);
        assert_eq!(resp["cardPresent"], false);
        assert!(resp["message"].is_string());
    }

    #[test]
    fn test_check_reader_no_reader_at_all() {
        let (lines, _) = run_session(&[r#"{"command":"CHECK_READER"}"#], |h| {
            h.set_reader_count(0);
        });
        let resp = &lines[1];
        assert_eq!(resp["success"], false);
        assert_eq!(resp["kind"], "device_error");
    }

    #[test]
    fn test_check_reader_initialization_failure() {
        let (lines, _) = run_session(&[r#"{"command":"CHECK_READER"}"#], |h| {
            h.fail_next(SimOp::Initialize, NativeStatus::UNKNOWN_CARD);
        });
        let resp = &lines[1];
        assert_eq!(resp["success"], false);
        assert_eq!(resp["kind"], "initialization_error");
        assert_eq!(resp["readerConnected"], true);
        assert_eq!(resp["cardPresent"], true);
    }

    #[test]
    fn test_read_card_returns_all_fields() {
        let (lines, _) = run_session(&[r#"{"command":"READ_CARD"}"#], |_| {});
        let resp = &lines[1];
        assert_eq!(resp["success"], true);
        assert_eq!(resp["serialNumber"], "051A00429C170003");
        assert_eq!(resp["counter"], 0);
        assert_eq!(resp["balance"], 500_000);
        assert_eq!(resp["keyId"], 1);
        assert_eq!(resp["slot"], 0);
    }

    #[test]
    fn test_read_card_serial_failure_aborts() {
        let (lines, handle) = run_session(
            &[r#"{"command":"READ_CARD"}"#, r#"{"command":"STATUS"}"#],
            |h| {
                h.fail_next(SimOp::ReadSerial, NativeStatus::FILE_NOT_FOUND);
            },
        );
        let resp = &lines[1];
        assert_eq!(resp["success"], false);
        assert_eq!(resp["kind"], "card_error");
        // Transaction was still released.
        assert_eq!(lines[2]["inTransaction"], false);
        assert!(!handle.in_transaction());
    }

    #[test]
    fn test_read_card_counter_failure_degrades_to_zero() {
        // A seal first bumps the card counter to 1, so the 0 in the response
        // is genuinely the degradation default and not the card value.
        let (lines, _) = run_session(
            &[
                r#"{"command":"COMPUTE_SEAL","price":1.0}"#,
                r#"{"command":"READ_CARD"}"#,
            ],
            |_| {},
        );
        assert_eq!(lines[2]["counter"], 1);

        let (lines, handle) = run_session(
            &[
                r#"{"command":"COMPUTE_SEAL","price":1.0}"#,
                r#"{"command":"READ_CARD"}"#,
            ],
            |h| {
                h.fail_next(SimOp::ReadCounter, NativeStatus::RECORD_NOT_FOUND);
            },
        );
        let resp = &lines[2];
        assert_eq!(resp["success"], true);
        assert_eq!(resp["counter"], 0);
        assert_eq!(handle.counter(), 1);
    }

    #[test]
    fn test_read_card_card_absent() {
        let (lines, _) = run_session(&[r#"{"command":"READ_CARD"}"#], |h| {
            h.remove_card();
        });
        let resp = &lines[1];
        assert_eq!(resp["success"], false);
        assert_eq!(resp["kind"], "card_error");
    }

    #[test]
    fn test_compute_seal_success() {
        let (lines, handle) = run_session(
            &[r#"{"command":"COMPUTE_SEAL","price":12.5,"timestamp":"2024-03-07 14:05"}"#],
            |_| {},
        );
        let resp = &lines[1];
        assert_eq!(resp["success"], true);
        assert_eq!(resp["serialNumber"], "051A00429C170003");
        assert_eq!(resp["mac"].as_str().unwrap().len(), 16);
        assert_eq!(resp["counter"], 1);
        assert_eq!(resp["timestamp"], "2024-03-07 14:05");
        assert_eq!(resp["price"], 12.5);
        assert_eq!(handle.counter(), 1);
        assert!(!handle.in_transaction());
    }

    #[test]
    fn test_compute_seal_authorization_error_releases_transaction() {
        let (lines, handle) = run_session(
            &[
                r#"{"command":"COMPUTE_SEAL","price":5.0}"#,
                r#"{"command":"STATUS"}"#,
            ],
            |h| {
                h.fail_next(SimOp::ComputeSeal, NativeStatus::NOT_AUTHORIZED);
            },
        );
        let resp = &lines[1];
        assert_eq!(resp["success"], false);
        assert_eq!(resp["kind"], "authorization_error");
        assert_eq!(resp["error"], "not authorized (wrong PIN?)");
        assert_eq!(lines[2]["inTransaction"], false);
        assert!(!handle.in_transaction());
    }

    #[test]
    fn test_compute_seal_negative_price_no_card_io() {
        let (lines, handle) = run_session(
            &[r#"{"command":"COMPUTE_SEAL","price":-2.0}"#],
            |_| {},
        );
        assert_eq!(lines[1]["success"], false);
        assert_eq!(lines[1]["kind"], "protocol_error");
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_transaction_released_after_every_response() {
        let (lines, handle) = run_session(
            &[
                r#"{"command":"CHECK_READER"}"#,
                r#"{"command":"READ_CARD"}"#,
                r#"{"command":"COMPUTE_SEAL","price":1.0}"#,
                r#"{"command":"STATUS"}"#,
            ],
            |_| {},
        );
        for line in &lines[1..] {
            if line.get("inTransaction").is_some() {
                assert_eq!(line["inTransaction"], false);
            }
        }
        assert!(!handle.in_transaction());
    }

    #[test]
    fn test_exit_cleans_up_and_stops() {
        let (lines, handle) = run_session(
            &[
                r#"{"command":"CHECK_READER"}"#,
                r#"{"command":"EXIT"}"#,
                r#"{"command":"STATUS"}"#,
            ],
            |_| {},
        );
        // Banner, CHECK_READER, EXIT — the trailing STATUS is never read.
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["success"], true);

        let finalizes = handle
            .calls()
            .iter()
            .filter(|op| **op == SimOp::Finalize)
            .count();
        assert_eq!(finalizes, 1);
        assert!(!handle.initialized());
    }

    #[test]
    fn test_eof_runs_cleanup() {
        let (_, handle) = run_session(&[r#"{"command":"CHECK_READER"}"#], |_| {});
        // Input ended without EXIT; the session was still finalized.
        let finalizes = handle
            .calls()
            .iter()
            .filter(|op| **op == SimOp::Finalize)
            .count();
        assert_eq!(finalizes, 1);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let (lines, _) = run_session(&["", "   ", r#"{"command":"STATUS"}"#], |_| {});
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_hung_native_call_yields_device_error_and_loop_stays_responsive() {
        use crate::card::timed::TimedAdapter;
        use std::time::Duration;

        let card = SimulatedCard::new();
        card.handle().set_probe_delay(Duration::from_millis(100));
        let timed =
            TimedAdapter::spawn(Box::new(card), Duration::from_millis(20)).unwrap();

        let input = [r#"{"command":"CHECK_READER"}"#, r#"{"command":"STATUS"}"#].join("\n");
        let mut dispatcher = Dispatcher::new(
            Box::new(timed),
            Cursor::new(input.into_bytes()),
            Vec::new(),
        );
        dispatcher.run().unwrap();

        let output = String::from_utf8(dispatcher.output).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // The stalled probe times out into a device error, and the loop still
        // answers the next command.
        assert_eq!(lines[1]["success"], false);
        assert_eq!(lines[1]["kind"], "device_error");
        assert_eq!(lines[2]["success"], true);
        assert_eq!(lines[2]["initialized"], false);
    }

    #[test]
    fn test_session_recovers_after_card_removal() {
        // Card removal mid-session resets initialization; re-inserting the
        // card lets the next operation initialize from scratch.
        let card = SimulatedCard::new();
        let handle = card.handle();
        let mut mgr = SessionManager::new(Box::new(card));
        match mgr.detect_card() {
            CardDetection::Found { slot } => mgr.ensure_initialized(slot).unwrap(),
            other => panic!("expected card, got {other:?}"),
        }

        handle.remove_card();
        assert!(mgr.verify_present().is_err());
        assert!(!mgr.session().initialized);

        handle.insert_card(0);
        mgr.verify_present().unwrap();
        mgr.ensure_initialized(0).unwrap();
        assert!(mgr.session().initialized);
    }
}
