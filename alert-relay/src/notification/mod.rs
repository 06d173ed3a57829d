//! Notifications: construction, routing and delivery.

pub mod builder;
pub mod dispatch;
pub mod handler;
pub mod idempotency;
pub mod log;
pub mod message;
pub mod model;
pub mod service;

pub use dispatch::{DispatchOutput, Dispatcher, ReceiverDispatcher, SubscriberDispatcher};
pub use handler::{CleanupJob, Handler};
pub use log::{LogService, NotificationLog};
pub use message::{Message, MessageOptions, MessageStatus};
pub use model::Notification;
pub use service::NotificationService;
