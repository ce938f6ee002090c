//! The Subscription Engine (spec §4.5, C5): parses `SubscriptionTopic` and
//! `Subscription` resources, evaluates resource triggers and filters against
//! writes, and hands matched events to the Notification Dispatcher.

pub mod engine;
pub mod event_matcher;
pub mod registry;
pub mod topic_registry;
pub mod types;

pub use engine::process_write;
pub use event_matcher::WriteKind;
pub use registry::{parse_subscription, SubscriptionRegistry};
pub use topic_registry::{parse_subscription_topic, TopicRegistry};
pub use types::{
    ActiveSubscription, ChannelType, NotificationShape, ParsedSubscriptionTopic, PayloadContent, SubscriptionChannel,
    SubscriptionEvent, SubscriptionFilter, SubscriptionStatus, TopicStatus,
};
