pub mod aggregate;
pub mod batch;
pub mod error;
pub mod input;
pub mod job;
pub mod models;
pub mod report;
pub mod retry;
pub mod sink;
pub mod throttle;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use aggregate::{Aggregator, BatchSummary};
pub use batch::{
    BatchEvent, BatchOrchestrator, BatchReport, BatchReporter, TracingBatchReporter, run_batch,
};
pub use error::{AppError, FetchError, FetchErrorKind};
pub use job::{BatchConfig, BatchJob, ExistingOutputPolicy};
pub use models::{
    Address, AttemptResult, Document, Extraction, FieldWarning, Record, WarningKind,
    compute_hash, record_file_name,
};
pub use retry::{AttemptRunner, RetryPolicy};
pub use sink::JsonDirSink;
pub use throttle::{RateLimitedFetcher, RateLimiter};
pub use traits::{Extractor, Fetcher, RecordSink};
