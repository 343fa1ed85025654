//! In-process message bus: topics, envelopes and the publish/subscribe broker

pub mod broker;
pub mod message;
pub mod topic;

pub use broker::{BusStats, ChannelSubscriber, FnSubscriber, MessageBus, Subscriber, SubscriptionId};
pub use message::{Envelope, Outbound, Payload};
pub use topic::{Topic, TopicKind, TopicPattern};
