//! Attribution of transport topics to rooms and metrics.

pub mod resolver;

pub use resolver::{Resolution, TopicOverride, TopicResolver};
