//! Delivery and server counters

pub mod metrics;

pub use metrics::{BusCounters, BusStats, ServerStats, SubscriberCounters, SubscriberStats};
