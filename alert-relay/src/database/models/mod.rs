//! Database models.
//!
//! These map directly to the SQLite schema: timestamps are epoch
//! milliseconds and map-shaped columns are JSON text.

pub mod idempotency;
pub mod message;
pub mod notification;
pub mod silence;

pub use idempotency::*;
pub use message::*;
pub use notification::*;
pub use silence::*;
