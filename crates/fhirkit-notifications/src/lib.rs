//! The Notification Dispatcher (spec §4.6, C6): channel-typed fan-out of
//! subscription events with retry accounting and a heartbeat scheduler.

pub mod adapters;
pub mod bundle;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod types;

pub use adapters::{EmailAdapter, NotificationAdapter, WebhookAdapter, ZulipAdapter};
pub use bundle::build_notification_bundle;
pub use error::NotificationError;
pub use scheduler::run_heartbeat_scheduler;
pub use service::NotificationDispatcher;
pub use types::{DeliveryOutcome, NotificationBundle, NotificationKind};
