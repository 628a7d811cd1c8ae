//! Status-change event feed for live subscribers.

pub mod publisher;

pub use publisher::{StatusChangeEvent, StatusEventPublisher};
