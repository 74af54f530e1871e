//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::{BatchEvent, BatchReporter};
use crate::error::{AppError, FetchError, FetchErrorKind};
use crate::models::{Document, Extraction, FieldWarning, Record};
use crate::traits::{Extractor, Fetcher, RecordSink};

/// Scripted response for one fetch call.
pub type MockResponse = Result<String, FetchErrorKind>;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns scripted responses.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses shared by all addresses. Each call pops the first
    /// element. If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Per-address queues, consulted before the shared queue.
    by_address: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    delay: Duration,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(kind: FetchErrorKind) -> Self {
        Self::with_responses(vec![Err(kind)])
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            by_address: Arc::new(Mutex::new(HashMap::new())),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetcher whose responses are scripted per address.
    pub fn by_address(scripts: Vec<(&str, Vec<MockResponse>)>) -> Self {
        let fetcher = Self::with_responses(Vec::new());
        {
            let mut map = fetcher.by_address.lock().unwrap();
            for (address, responses) in scripts {
                map.insert(address.to_string(), responses);
            }
        }
        fetcher
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_response(&self, address: &str) -> MockResponse {
        let mut map = self.by_address.lock().unwrap();
        if let Some(queue) = map.get_mut(address) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }
        drop(map);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, address: &str, _timeout: Duration) -> Result<Document, FetchError> {
        self.calls.lock().unwrap().push(address.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_response(address) {
            Ok(html) => Ok(Document::new(address, html)),
            Err(kind) => Err(FetchError::new(kind, address, format!("mock {kind}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor: the record's title is the document's HTML.
#[derive(Clone, Default)]
pub struct MockExtractor {
    warnings: Arc<Mutex<Vec<FieldWarning>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach these warnings to every extraction.
    pub fn with_warnings(warnings: Vec<FieldWarning>) -> Self {
        Self {
            warnings: Arc::new(Mutex::new(warnings)),
        }
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, document: &Document) -> Extraction {
        let mut record = Record::new(&document.address);
        let text = document.html.trim();
        if !text.is_empty() {
            record.basic_info.title = Some(text.to_string());
        }
        Extraction {
            record,
            warnings: self.warnings.lock().unwrap().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Recorded failure: (address, kind, attempts).
pub type FailureRecord = (String, FetchErrorKind, u32);

/// Mock sink that records saves and failures in memory.
#[derive(Clone, Default)]
pub struct MockSink {
    pub saved: Arc<Mutex<Vec<(String, Record)>>>,
    pub failures: Arc<Mutex<Vec<FailureRecord>>>,
    existing: Arc<Mutex<HashSet<String>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MockSink {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sink that already holds records for these addresses.
    pub fn with_existing(addresses: &[&str]) -> Self {
        let sink = Self::default();
        sink.existing
            .lock()
            .unwrap()
            .extend(addresses.iter().map(|a| a.to_string()));
        sink
    }

    /// Sink whose next save fails.
    pub fn with_save_error(error: AppError) -> Self {
        let sink = Self::default();
        *sink.save_error.lock().unwrap() = Some(error);
        sink
    }

    pub fn saved_addresses(&self) -> Vec<String> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|(a, _)| a.clone())
            .collect()
    }
}

impl RecordSink for MockSink {
    async fn save_record(&self, address: &str, record: &Record) -> Result<(), AppError> {
        let mut err = self.save_error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        self.saved
            .lock()
            .unwrap()
            .push((address.to_string(), record.clone()));
        Ok(())
    }

    async fn record_failure(&self, error: &FetchError, attempts: u32) -> Result<(), AppError> {
        self.failures
            .lock()
            .unwrap()
            .push((error.address.clone(), error.kind, attempts));
        Ok(())
    }

    async fn has_record(&self, address: &str) -> Result<bool, AppError> {
        Ok(self.existing.lock().unwrap().contains(address))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock batch reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl BatchReporter for MockReporter {
    fn report(&self, event: BatchEvent<'_>) {
        let label = match &event {
            BatchEvent::Started { .. } => "Started",
            BatchEvent::Skipped { .. } => "Skipped",
            BatchEvent::Completed { .. } => "Completed",
            BatchEvent::Failed { .. } => "Failed",
            BatchEvent::PersistFailed { .. } => "PersistFailed",
            BatchEvent::Progress { .. } => "Progress",
            BatchEvent::Cancelled { .. } => "Cancelled",
            BatchEvent::Finished { .. } => "Finished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
