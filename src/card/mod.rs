//! Card access layer.
//!
//! Everything that touches the vendor fiscal smart-card library: the
//! injectable adapter trait and its backends (simulated, native placeholder),
//! the per-call timeout boundary, status-word translation, BCD timestamp
//! encoding, and the session/transaction discipline the library demands.

pub mod adapter;
pub mod bcd;
pub mod native;
pub mod session;
pub mod sim;
pub mod status;
pub mod timed;
pub mod transaction;

pub use adapter::{create_adapter, CardAdapter, CardFault};
pub use session::{CardDetection, CardSession, SessionManager};
