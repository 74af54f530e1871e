use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, FetchError};
use crate::models::{Document, Extraction, Record};

/// Turns an address into a rendered [`Document`].
///
/// Implementations wrap the rendering/automation driver and must classify
/// every failure as a [`FetchError`]; the timeout applies to this one call.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        address: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Document, FetchError>> + Send;
}

/// Maps a rendered document onto the product [`Record`] schema.
///
/// Never fails for a structurally valid document: unresolved fields are
/// left absent and reported as warnings in the returned [`Extraction`].
pub trait Extractor: Send + Sync + Clone {
    fn extract(&self, document: &Document) -> Extraction;
}

/// Persists completed records and terminal failures as they arrive.
pub trait RecordSink: Send + Sync {
    /// Write (or overwrite) the record for an address.
    fn save_record(
        &self,
        address: &str,
        record: &Record,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append a terminal failure to the failure log.
    fn record_failure(
        &self,
        error: &FetchError,
        attempts: u32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Whether a record for this address was already persisted.
    fn has_record(&self, address: &str) -> impl Future<Output = Result<bool, AppError>> + Send;
}
