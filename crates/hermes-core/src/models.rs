use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FetchError;

/// Identifier of a page to fetch (a URL). Opaque to the pipeline.
pub type Address = String;

/// A rendered page as returned by a [`Fetcher`](crate::traits::Fetcher).
///
/// Owned by the extraction call that consumes it; the parsed DOM is built
/// and dropped inside the extractor.
#[derive(Debug, Clone)]
pub struct Document {
    /// The address that was requested.
    pub address: Address,
    /// Where the page ended up after redirects / client-side navigation.
    pub final_url: String,
    /// Rendered HTML.
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(address: impl Into<String>, html: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            final_url: address.clone(),
            address,
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = url.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Record schema
// ---------------------------------------------------------------------------

/// Structured output for one product page.
///
/// Scalar fields are `Option`s serialized as `null` when not found, so a
/// consumer can tell "not found" apart from an empty value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub url: String,
    pub basic_info: BasicInfo,
    pub pricing: Pricing,
    pub reviews_and_ratings: ReviewsAndRatings,
    pub product_variations: Vec<Variation>,
    pub images: Vec<Image>,
    pub shipping_info: ShippingInfo,
    pub specifications: BTreeMap<String, String>,
    pub seller_info: SellerInfo,
    pub embedded_data: serde_json::Map<String, serde_json::Value>,
    pub meta_tags: BTreeMap<String, String>,
    pub page_language: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl Record {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scraped_at: Utc::now(),
            ..Default::default()
        }
    }

    /// True when no top-level group carries any data.
    pub fn is_empty(&self) -> bool {
        self.basic_info.is_empty()
            && self.pricing.is_empty()
            && self.reviews_and_ratings.is_empty()
            && self.product_variations.is_empty()
            && self.images.is_empty()
            && self.shipping_info.is_empty()
            && self.specifications.is_empty()
            && self.seller_info.is_empty()
            && self.embedded_data.is_empty()
            && self.meta_tags.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub title: Option<String>,
    pub product_id: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
}

impl BasicInfo {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.product_id.is_none()
            && self.category.is_none()
            && self.brand.is_none()
    }
}

/// A price that parsed to a number and a currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub value: f64,
    /// ISO-4217 code, e.g. `USD`.
    pub currency: String,
    /// The text or JSON the price was read from.
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub current_price: Option<Price>,
    pub original_price: Option<Price>,
    pub discount_percent: Option<f64>,
    pub bulk_price: Option<String>,
    pub tax_info: Option<String>,
}

impl Pricing {
    pub fn is_empty(&self) -> bool {
        self.current_price.is_none()
            && self.original_price.is_none()
            && self.discount_percent.is_none()
            && self.bulk_price.is_none()
            && self.tax_info.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewsAndRatings {
    /// Average rating on a 0-5 scale.
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub sold_count: Option<u64>,
    pub individual_reviews: Vec<Review>,
}

impl ReviewsAndRatings {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none()
            && self.review_count.is_none()
            && self.sold_count.is_none()
            && self.individual_reviews.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: Option<String>,
    pub text: Option<String>,
    pub rating: Option<f64>,
    pub sku: Option<String>,
    pub images: Vec<String>,
}

impl Review {
    pub fn is_empty(&self) -> bool {
        self.reviewer.is_none()
            && self.text.is_none()
            && self.rating.is_none()
            && self.sku.is_none()
            && self.images.is_empty()
    }
}

/// One variation axis (e.g. "Color") and its options, in page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub name: String,
    pub options: Vec<VariationOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationOption {
    pub text: Option<String>,
    pub image: Option<String>,
    pub alt_text: Option<String>,
    pub selected: bool,
    pub sold_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Main,
    Gallery,
    Thumbnail,
    Og,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub kind: ImageKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub free_shipping: Option<String>,
    pub delivery_time: Option<String>,
    pub delivery_to: Option<String>,
    pub shipping_cost: Option<String>,
    pub methods: Vec<String>,
}

impl ShippingInfo {
    pub fn is_empty(&self) -> bool {
        self.free_shipping.is_none()
            && self.delivery_time.is_none()
            && self.delivery_to.is_none()
            && self.shipping_cost.is_none()
            && self.methods.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub store_name: Option<String>,
    pub store_url: Option<String>,
    /// Positive-feedback percentage as displayed by the store (0-100).
    pub store_rating: Option<f64>,
    pub followers: Option<u64>,
    pub years_in_business: Option<u64>,
}

impl SellerInfo {
    pub fn is_empty(&self) -> bool {
        self.store_name.is_none()
            && self.store_url.is_none()
            && self.store_rating.is_none()
            && self.followers.is_none()
            && self.years_in_business.is_none()
    }
}

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Every strategy for the field came up empty.
    SelectorExhausted,
    /// A value was found but failed validation (non-numeric price, rating > 5).
    TypeMismatch,
    /// An embedded payload could not be parsed.
    ParseFailure,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarningKind::SelectorExhausted => "selector_exhausted",
            WarningKind::TypeMismatch => "type_mismatch",
            WarningKind::ParseFailure => "parse_failure",
        })
    }
}

/// Non-fatal note that one field could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWarning {
    /// Dotted path into the record, e.g. `pricing.current_price`.
    pub field: String,
    pub kind: WarningKind,
    pub detail: String,
}

impl FieldWarning {
    pub fn new(field: impl Into<String>, kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Result of running the field extractor over one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: Record,
    pub warnings: Vec<FieldWarning>,
}

impl Extraction {
    pub fn warnings_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldWarning> + 'a {
        self.warnings.iter().filter(move |w| w.field == field)
    }
}

/// Terminal outcome of processing one address.
#[derive(Debug, Clone)]
pub enum AttemptResult {
    Success {
        record: Box<Record>,
        warnings: Vec<FieldWarning>,
        attempts: u32,
    },
    Failure {
        error: FetchError,
        attempts: u32,
    },
}

impl AttemptResult {
    pub fn attempts(&self) -> u32 {
        match self {
            AttemptResult::Success { attempts, .. } | AttemptResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptResult::Success { .. })
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic record file name for an address.
pub fn record_file_name(address: &str) -> String {
    format!("product_{}.json", &compute_hash(address)[..16])
}
