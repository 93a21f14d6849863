//! The moderation core: policy, job life-cycle, review items and review queue.

pub(crate) mod config_store;
pub(crate) mod ingest;
pub(crate) mod jobs;
pub(crate) mod queue;
pub(crate) mod review;
pub(crate) mod streams;

pub use config_store::ConfigStore;
pub use ingest::{CensorHook, Ingestor};
pub use jobs::{JobManager, JobStore};
pub use queue::ReviewQueue;
pub use review::{NewReviewItem, ReviewStore};
pub use streams::StreamStore;
