// Prometheus pull export - snapshot model, per-instance scrape readers,
// the multi-instance merge, the text renderer and the shared listener

pub mod exposition;
pub mod reader;
pub mod server;
pub mod snapshot;

pub use exposition::TEXT_FORMAT_CONTENT_TYPE;
pub use reader::{MergedScrapeReader, ScrapeReader};
pub use server::{ScrapeEndpoint, ScrapeServerError};
pub use snapshot::{merge_snapshots, MergeError, MetricSnapshot, SnapshotPoints};
