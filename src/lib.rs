// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod sink;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::ingest::scheduler::Scheduler;
pub use crate::ingest::types::{SourceFamily, UnifiedArticle};
pub use crate::ingest::Collector;
pub use crate::notify::{BroadcastPublisher, PublisherMux};
