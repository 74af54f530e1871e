pub mod document;
pub mod extract;
pub mod fetcher;
pub mod value;

#[cfg(feature = "browser")]
pub mod browser_fetcher;

pub use document::ParsedDocument;
pub use extract::{FieldSpec, ProductExtractor, Strategy};
pub use fetcher::{FetchOptions, ReqwestFetcher};

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
