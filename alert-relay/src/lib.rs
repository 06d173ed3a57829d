//! Alert notification dispatch core.
//!
//! Alerts and direct receiver payloads become notifications, which are
//! routed to receivers (directly or through subscriptions, honoring
//! silences) and turned into messages on a durable queue. Background
//! handlers claim queued messages and publish them through notifier
//! plugins.

pub mod alert;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;
pub mod notifier;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod silence;
pub mod subscription;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
