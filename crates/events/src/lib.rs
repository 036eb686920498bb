//! Per-job progress fan-out.
//!
//! The [`broker::ProgressBroker`] keeps one channel per job with any number
//! of bounded subscriber queues. Subscribers receive a snapshot of the job
//! first, then every update published after it.

pub mod broker;

pub use broker::{Delivery, ProgressBroker, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
