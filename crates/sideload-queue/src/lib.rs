//! Sideload Queue - Serialized download and install pipelines
//!
//! `QueueManager` owns the download and install queues, the selected device,
//! and the two workers that drain the queues one release at a time.

pub mod manager;

pub use manager::{Collaborators, QueueConfig, QueueError, QueueManager};
