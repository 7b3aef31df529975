//! Scoped card transaction guard.
//!
//! Card access must be bracketed in begin/end transaction or the card's
//! internal counters can desynchronize. [`TransactionGuard`] opens the
//! bracket on construction and closes it in `Drop`, so end-transaction runs
//! on every exit path: normal return, `?` early return, and panic unwind.
//!
//! A begin failure is tolerated: the guarded body still runs, since some
//! reader stacks succeed without an explicit transaction. End-transaction is
//! issued unconditionally either way, and an end failure is logged without
//! masking the body's outcome.

use tracing::{debug, warn};

use crate::card::adapter::CardAdapter;
use crate::card::session::CardSession;

/// RAII bracket around a card transaction. Obtain via
/// [`SessionManager::transaction`](crate::card::session::SessionManager::transaction).
pub struct TransactionGuard<'a> {
    adapter: &'a mut dyn CardAdapter,
    session: &'a mut CardSession,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn begin(
        adapter: &'a mut dyn CardAdapter,
        session: &'a mut CardSession,
    ) -> Self {
        match adapter.begin_transaction() {
            Ok(()) => {
                debug!("card transaction opened");
                session.in_transaction = true;
            }
            Err(fault) => {
                warn!(%fault, "begin-transaction failed; proceeding without exclusive access");
                session.in_transaction = false;
            }
        }
        Self { adapter, session }
    }

    /// The adapter, for card operations inside the bracket.
    pub fn adapter(&mut self) -> &mut dyn CardAdapter {
        &mut *self.adapter
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if let Err(fault) = self.adapter.end_transaction() {
            // Expected when begin was tolerated-failed; never masks the body.
            debug!(%fault, "end-transaction reported failure");
        }
        self.session.in_transaction = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
