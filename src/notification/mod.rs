//! Channel subscriptions and event fan-out.
//!
//! `SubscriptionBroker` sits on top of the connection registry: it validates
//! channel names, resolves recipients at call time and hands each one a shared
//! pre-serialized frame. Domain events enter through [`SubscriptionBroker::publish`],
//! which maps each event type to its default channel.

mod broker;
mod events;

pub use broker::{BrokerError, BrokerStatsSnapshot, DeliveryReport, SubscriptionBroker};
pub use events::{channels, is_valid_channel_name, DomainEvent, EventType};
