//! Repository layer for database access.

pub mod idempotency;
pub mod notification;
pub mod notification_log;
pub mod silence;

pub use idempotency::*;
pub use notification::*;
pub use notification_log::*;
pub use silence::*;
