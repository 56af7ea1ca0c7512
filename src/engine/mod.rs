//! Core engine: sources in, deduplicated events out.

pub mod aggregator;
pub mod cancel;
pub mod store;

pub use aggregator::Aggregator;
pub use cancel::CancelToken;
pub use store::{Store, Subscription, Unsubscribe};
