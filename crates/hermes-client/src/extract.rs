//! Product-page field extraction.
//!
//! Scalar fields are resolved from a declarative table of [`FieldSpec`]s:
//! each names a record field, the [`ValueKind`] it must validate as, and an
//! ordered list of [`Strategy`]s. The first strategy yielding a valid value
//! wins. Collections (images, variations, reviews, specifications, ...) have
//! their own fallback chains below.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use scraper::{ElementRef, Selector};
use serde_json::Value;

use hermes_core::models::{
    Document, Extraction, FieldWarning, Image, ImageKind, Record, Review, Variation,
    VariationOption, WarningKind,
};
use hermes_core::traits::Extractor;

use crate::document::{ParsedDocument, element_text};
use crate::value::{Candidate, FieldValue, ValueKind, normalize_whitespace};

/// Dotted record paths used in warnings and the field table.
pub mod fields {
    pub const TITLE: &str = "basic_info.title";
    pub const PRODUCT_ID: &str = "basic_info.product_id";
    pub const CATEGORY: &str = "basic_info.category";
    pub const BRAND: &str = "basic_info.brand";
    pub const CURRENT_PRICE: &str = "pricing.current_price";
    pub const ORIGINAL_PRICE: &str = "pricing.original_price";
    pub const DISCOUNT: &str = "pricing.discount_percent";
    pub const BULK_PRICE: &str = "pricing.bulk_price";
    pub const TAX_INFO: &str = "pricing.tax_info";
    pub const RATING: &str = "reviews_and_ratings.rating";
    pub const REVIEW_COUNT: &str = "reviews_and_ratings.review_count";
    pub const SOLD_COUNT: &str = "reviews_and_ratings.sold_count";
    pub const FREE_SHIPPING: &str = "shipping_info.free_shipping";
    pub const DELIVERY_TIME: &str = "shipping_info.delivery_time";
    pub const DELIVERY_TO: &str = "shipping_info.delivery_to";
    pub const SHIPPING_COST: &str = "shipping_info.shipping_cost";
    pub const STORE_NAME: &str = "seller_info.store_name";
    pub const STORE_URL: &str = "seller_info.store_url";
    pub const STORE_RATING: &str = "seller_info.store_rating";
    pub const FOLLOWERS: &str = "seller_info.followers";
    pub const YEARS_IN_BUSINESS: &str = "seller_info.years_in_business";

    pub const IMAGES: &str = "images";
    pub const VARIATIONS: &str = "product_variations";
    pub const SPECIFICATIONS: &str = "specifications";
    pub const EMBEDDED_DATA: &str = "embedded_data";
}

const MAX_REVIEWS: usize = 10;
const MAX_DESCRIPTION_SPECS: usize = 10;
const HOME_CRUMBS: &[&str] = &["home", "accueil", "startseite", "strona główna", "inicio"];

/// One way of locating a raw value in a page.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// JSON pointer into the embedded payloads, e.g. `/ld_json/name`.
    Embedded(String),
    /// Text of the first matching element.
    Selector(String),
    /// Attribute of the first matching element.
    Attribute { selector: String, attr: String },
    /// `<meta>` content by property, name or itemprop.
    Meta(String),
    /// Last breadcrumb link that is not a "Home" entry.
    Breadcrumb(String),
    /// Regex over the visible text; group 1 if present, else the match.
    TextScan(Regex),
    /// Regex over inline script bodies.
    ScriptScan(Regex),
    /// Regex over the canonical `og:url` and the document URL.
    UrlPattern(Regex),
}

impl Strategy {
    pub fn embedded(pointer: &str) -> Self {
        Strategy::Embedded(pointer.to_string())
    }

    pub fn selector(css: &str) -> Self {
        Strategy::Selector(css.to_string())
    }

    pub fn attribute(css: &str, attr: &str) -> Self {
        Strategy::Attribute {
            selector: css.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn meta(key: &str) -> Self {
        Strategy::Meta(key.to_string())
    }

    pub fn text_scan(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Strategy::TextScan)
    }

    pub fn url_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Strategy::UrlPattern)
    }

    fn candidate(&self, doc: &ParsedDocument) -> Option<Candidate> {
        match self {
            Strategy::Embedded(pointer) => doc.embedded(pointer).map(Candidate::from_json),
            Strategy::Selector(css) => doc.select_text(css).map(Candidate::Text),
            Strategy::Attribute { selector, attr } => {
                doc.select_attr(selector, attr).map(Candidate::Text)
            }
            Strategy::Meta(key) => doc.meta(key).map(Candidate::Text),
            Strategy::Breadcrumb(css) => doc
                .select(css)
                .into_iter()
                .rev()
                .map(element_text)
                .find(|t| !t.is_empty() && !HOME_CRUMBS.contains(&t.to_lowercase().as_str()))
                .map(Candidate::Text),
            Strategy::TextScan(re) => first_capture(re, doc.text()).map(Candidate::Text),
            Strategy::ScriptScan(re) => doc
                .scripts()
                .iter()
                .find_map(|s| first_capture(re, s))
                .map(Candidate::Text),
            Strategy::UrlPattern(re) => {
                let og_url = doc.meta("og:url");
                og_url
                    .as_deref()
                    .into_iter()
                    .chain([doc.final_url(), doc.address()])
                    .find_map(|u| first_capture(re, u))
                    .map(Candidate::Text)
            }
        }
    }
}

fn first_capture(re: &Regex, haystack: &str) -> Option<String> {
    let caps = re.captures(haystack)?;
    let text = caps.get(1).or_else(|| caps.get(0))?.as_str().trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Outcome of running a field's strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(FieldValue),
    /// At least one candidate was found and none validated.
    Mismatch(String),
    Exhausted,
}

/// Ordered fallback chain for one scalar field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field: String,
    pub kind: ValueKind,
    pub strategies: Vec<Strategy>,
}

impl FieldSpec {
    pub fn new(field: &str, kind: ValueKind, strategies: Vec<Strategy>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            strategies,
        }
    }

    pub fn resolve(&self, doc: &ParsedDocument) -> Resolution {
        let mut mismatch = None;
        for strategy in &self.strategies {
            let Some(candidate) = strategy.candidate(doc) else {
                continue;
            };
            match self.kind.validate(&candidate) {
                Ok(value) => return Resolution::Found(value),
                Err(detail) => {
                    tracing::trace!(field = %self.field, %detail, "Candidate rejected");
                    mismatch.get_or_insert(detail);
                }
            }
        }
        match mismatch {
            Some(detail) => Resolution::Mismatch(detail),
            None => Resolution::Exhausted,
        }
    }
}

/// [`Extractor`] for e-commerce product pages.
#[derive(Debug, Clone)]
pub struct ProductExtractor {
    fields: Arc<Vec<FieldSpec>>,
}

impl Default for ProductExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductExtractor {
    pub fn new() -> Self {
        Self::with_fields(default_field_specs())
    }

    pub fn with_fields(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Append a fallback strategy to a field's chain.
    pub fn with_strategy(mut self, field: &str, strategy: Strategy) -> Self {
        let fields = Arc::make_mut(&mut self.fields);
        match fields.iter_mut().find(|f| f.field == field) {
            Some(spec) => spec.strategies.push(strategy),
            None => tracing::warn!(%field, "No such field, strategy ignored"),
        }
        self
    }

    fn extract_parsed(&self, document: &Document, doc: &ParsedDocument) -> Extraction {
        let mut record = Record::new(&document.address);
        record.scraped_at = document.fetched_at;
        let mut warnings = Vec::new();

        for spec in self.fields.iter() {
            match spec.resolve(doc) {
                Resolution::Found(value) => {
                    if !assign(&mut record, &spec.field, value, doc) {
                        warnings.push(FieldWarning::new(
                            &spec.field,
                            WarningKind::TypeMismatch,
                            format!("{:?} value does not fit this field", spec.kind),
                        ));
                    }
                }
                Resolution::Mismatch(detail) => {
                    warnings.push(FieldWarning::new(&spec.field, WarningKind::TypeMismatch, detail));
                }
                Resolution::Exhausted => {
                    warnings.push(FieldWarning::new(
                        &spec.field,
                        WarningKind::SelectorExhausted,
                        format!("none of {} strategies matched", spec.strategies.len()),
                    ));
                }
            }
        }

        record.images = extract_images(doc);
        record.product_variations = extract_variations(doc);
        record.reviews_and_ratings.individual_reviews = extract_reviews(doc);
        record.shipping_info.methods = extract_shipping_methods(doc);
        record.specifications = extract_specifications(doc);
        record.meta_tags = extract_meta_tags(doc);
        record.embedded_data = doc.embedded_data();
        record.page_language = Some(detect_language(doc));

        for (field, empty) in [
            (fields::IMAGES, record.images.is_empty()),
            (fields::VARIATIONS, record.product_variations.is_empty()),
            (fields::SPECIFICATIONS, record.specifications.is_empty()),
        ] {
            if empty {
                warnings.push(FieldWarning::new(
                    field,
                    WarningKind::SelectorExhausted,
                    "no entries found",
                ));
            }
        }

        for failure in doc.payload_failures() {
            warnings.push(FieldWarning::new(
                fields::EMBEDDED_DATA,
                WarningKind::ParseFailure,
                format!("{}: {}", failure.name, failure.message),
            ));
        }

        Extraction { record, warnings }
    }
}

impl Extractor for ProductExtractor {
    fn extract(&self, document: &Document) -> Extraction {
        let doc = ParsedDocument::parse(document);
        let extraction = self.extract_parsed(document, &doc);
        tracing::debug!(
            address = %document.address,
            warnings = extraction.warnings.len(),
            "Extracted record"
        );
        extraction
    }
}

/// Write a validated value into the record. Returns false when the value
/// kind does not fit the field.
fn assign(record: &mut Record, field: &str, value: FieldValue, doc: &ParsedDocument) -> bool {
    use fields::*;

    match (field, value) {
        (TITLE, FieldValue::Text(v)) => record.basic_info.title = Some(v),
        (PRODUCT_ID, FieldValue::Text(v)) => record.basic_info.product_id = Some(v),
        (CATEGORY, FieldValue::Text(v)) => record.basic_info.category = Some(v),
        (BRAND, FieldValue::Text(v)) => record.basic_info.brand = Some(v),
        (CURRENT_PRICE, FieldValue::Price(p)) => record.pricing.current_price = Some(p),
        (ORIGINAL_PRICE, FieldValue::Price(p)) => record.pricing.original_price = Some(p),
        (DISCOUNT, FieldValue::Number(n)) => record.pricing.discount_percent = Some(n),
        (BULK_PRICE, FieldValue::Text(v)) => record.pricing.bulk_price = Some(v),
        (TAX_INFO, FieldValue::Text(v)) => record.pricing.tax_info = Some(v),
        (RATING, FieldValue::Number(n)) => record.reviews_and_ratings.rating = Some(n),
        (REVIEW_COUNT, FieldValue::Count(c)) => record.reviews_and_ratings.review_count = Some(c),
        (SOLD_COUNT, FieldValue::Count(c)) => record.reviews_and_ratings.sold_count = Some(c),
        (FREE_SHIPPING, FieldValue::Text(v)) => record.shipping_info.free_shipping = Some(v),
        (DELIVERY_TIME, FieldValue::Text(v)) => record.shipping_info.delivery_time = Some(v),
        (DELIVERY_TO, FieldValue::Text(v)) => record.shipping_info.delivery_to = Some(v),
        (SHIPPING_COST, FieldValue::Text(v)) => record.shipping_info.shipping_cost = Some(v),
        (STORE_NAME, FieldValue::Text(v)) => record.seller_info.store_name = Some(v),
        (STORE_URL, FieldValue::Text(v)) => {
            record.seller_info.store_url = Some(doc.resolve_url(&v).unwrap_or(v));
        }
        (STORE_RATING, FieldValue::Number(n)) => record.seller_info.store_rating = Some(n),
        (FOLLOWERS, FieldValue::Count(c)) => record.seller_info.followers = Some(c),
        (YEARS_IN_BUSINESS, FieldValue::Count(c)) => record.seller_info.years_in_business = Some(c),
        _ => return false,
    }
    true
}

fn scan(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hardcoded regex pattern is valid")
}

/// The built-in field table: page markup first, then embedded payloads, then
/// meta tags and text scans.
pub fn default_field_specs() -> Vec<FieldSpec> {
    use Strategy as S;
    use ValueKind::*;
    use fields::*;

    vec![
        FieldSpec::new(
            TITLE,
            Text,
            vec![
                S::selector(r#"h1[data-pl="product-title"]"#),
                S::selector(".title--wrap--UUHae_g h1"),
                S::selector(".product-title"),
                S::selector("h1"),
                S::embedded("/runParams/data/titleModule/subject"),
                S::embedded("/ld_json/name"),
                S::meta("og:title"),
            ],
        ),
        FieldSpec::new(
            PRODUCT_ID,
            Text,
            vec![
                S::UrlPattern(scan(r"/item/(\d+)\.html")),
                S::embedded("/runParams/data/productInfoComponent/id"),
                S::embedded("/ld_json/sku"),
                S::embedded("/ld_json/productID"),
                S::ScriptScan(scan(r#"productId["']?\s*:\s*["']?(\d+)"#)),
            ],
        ),
        FieldSpec::new(
            CATEGORY,
            Text,
            vec![
                S::Breadcrumb(".breadcrumb a, .nav-breadcrumb a, [class*=\"breadcrumb\"] a".into()),
                S::embedded("/ld_json/category"),
                S::meta("category"),
            ],
        ),
        FieldSpec::new(
            BRAND,
            Text,
            vec![
                S::selector(".product-brand"),
                S::selector(".brand-name"),
                S::attribute("[data-brand]", "data-brand"),
                S::selector(".manufacturer"),
                S::embedded("/ld_json/brand/name"),
                S::embedded("/ld_json/brand"),
                S::meta("product:brand"),
            ],
        ),
        FieldSpec::new(
            CURRENT_PRICE,
            Price,
            vec![
                S::selector("span.product-price-value"),
                S::selector(".price--currentPriceText--V8_y_b5"),
                S::selector(".pdp-comp-price-current"),
                S::selector(r#"[data-pl="product-price"] .price--current--I3Zeidd span"#),
                S::selector(".product-price-current"),
                S::embedded("/runParams/data/priceModule/minActivityAmount"),
                S::embedded("/runParams/data/priceModule/formatedActivityPrice"),
                S::embedded("/runParams/data/priceModule/minAmount"),
                S::embedded("/runParams/data/priceModule/formatedPrice"),
                S::embedded("/productData/price"),
                S::embedded("/ld_json/offers"),
            ],
        ),
        FieldSpec::new(
            ORIGINAL_PRICE,
            Price,
            vec![
                S::selector(".price--originalPrice"),
                S::selector(".price--originalText--gxVO5_d"),
                S::selector(".product-price-original"),
                S::selector(".price--lineThrough"),
                S::selector(".pdp-comp-price-original"),
            ],
        ),
        FieldSpec::new(
            DISCOUNT,
            Percent,
            vec![
                S::selector(".discount-percent"),
                S::selector(".sale-percent"),
                S::selector(".price--discount--Y9uG2LK"),
                S::embedded("/runParams/data/priceModule/discount"),
                S::TextScan(scan(r"(?i)(\d{1,2}(?:[.,]\d+)?)\s*%\s*off")),
            ],
        ),
        FieldSpec::new(
            BULK_PRICE,
            Text,
            vec![
                S::selector(".bulk-price"),
                S::TextScan(scan(r"(?i)[^\n]*(?:za szt|per piece|/\s*pieces?)[^\n]*")),
            ],
        ),
        FieldSpec::new(
            TAX_INFO,
            Text,
            vec![
                S::selector(".tax-info"),
                S::TextScan(scan(r"(?i)[^\n]*(?:bez podatku|\btax\b|\bVAT\b)[^\n]*")),
            ],
        ),
        FieldSpec::new(
            RATING,
            Rating,
            vec![
                S::selector(".overview-rating-average"),
                S::selector(".reviewer--rating--xrWWFzx strong"),
                S::selector(r#"[data-pl="product-reviewer"] strong"#),
                S::embedded("/runParams/data/feedbackComponent/evarageStar"),
                S::embedded("/runParams/data/titleModule/feedbackRating/averageStar"),
                S::embedded("/ld_json/aggregateRating/ratingValue"),
            ],
        ),
        FieldSpec::new(
            REVIEW_COUNT,
            Count,
            vec![
                S::selector(".reviewer--reviews--cx7Zs_V"),
                S::selector(".review-count"),
                S::embedded("/runParams/data/feedbackComponent/totalValidNum"),
                S::embedded("/runParams/data/titleModule/feedbackRating/totalValidNum"),
                S::embedded("/ld_json/aggregateRating/reviewCount"),
                S::embedded("/ld_json/aggregateRating/ratingCount"),
                S::selector(r#"a[href*="review"]"#),
            ],
        ),
        FieldSpec::new(
            SOLD_COUNT,
            Count,
            vec![
                S::selector(".reviewer--sold--ytPeoEy"),
                S::selector(".product-sold-count"),
                S::embedded("/runParams/data/tradeComponent/formatTradeCount"),
                S::embedded("/runParams/data/titleModule/formatTradeCount"),
                S::TextScan(scan(r"(?i)(\d[\d.,]*\s*[km]?\+?)\s*(?:sold|orders|sprzedanych)")),
            ],
        ),
        FieldSpec::new(
            FREE_SHIPPING,
            Text,
            vec![
                S::selector(".free-shipping"),
                S::TextScan(scan(r"(?i)[^\n]*(?:free shipping|darmowa dostawa|免费)[^\n]*")),
            ],
        ),
        FieldSpec::new(
            DELIVERY_TIME,
            Text,
            vec![
                S::selector(".delivery-time"),
                S::TextScan(scan(r"[^\n]*\b[A-Za-z]{3}\s+\d+\s*-\s*[A-Za-z]{3}\s+\d+\b[^\n]*")),
                S::TextScan(scan(r"(?i)[^\n]*\b\d+\s*-\s*\d+\s*days?\b[^\n]*")),
                S::TextScan(scan(r"[^\n]*\b\d+\s*dni\b[^\n]*")),
            ],
        ),
        FieldSpec::new(
            DELIVERY_TO,
            Text,
            vec![
                S::selector(".delivery-v2--to--Mtweg7y"),
                S::selector(".delivery-location"),
            ],
        ),
        FieldSpec::new(
            SHIPPING_COST,
            Text,
            vec![S::selector(".shipping-cost"), S::selector(".delivery-cost")],
        ),
        FieldSpec::new(
            STORE_NAME,
            Text,
            vec![
                S::selector(".store-name"),
                S::selector(".seller-name"),
                S::selector(r#"a[href*="/store/"]"#),
                S::embedded("/runParams/data/storeModule/storeName"),
                S::embedded("/ld_json/offers/seller/name"),
            ],
        ),
        FieldSpec::new(
            STORE_URL,
            Text,
            vec![
                S::attribute(r#"a[href*="/store/"]"#, "href"),
                S::attribute(".store-link", "href"),
                S::attribute(".seller-link", "href"),
                S::embedded("/runParams/data/storeModule/storeURL"),
            ],
        ),
        FieldSpec::new(
            STORE_RATING,
            Percent,
            vec![
                S::selector(".store-rating"),
                S::selector(".seller-rating"),
                S::embedded("/runParams/data/storeModule/positiveRate"),
            ],
        ),
        FieldSpec::new(
            FOLLOWERS,
            Count,
            vec![
                S::selector(".store-followers"),
                S::selector(".follower-count"),
                S::embedded("/runParams/data/storeModule/followingNumber"),
            ],
        ),
        FieldSpec::new(
            YEARS_IN_BUSINESS,
            Count,
            vec![
                S::selector(".store-years"),
                S::selector(".years-in-business"),
                S::embedded("/runParams/data/storeModule/openedYear"),
            ],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn select_within<'a>(element: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    selector(css)
        .map(|s| element.select(&s).collect())
        .unwrap_or_default()
}

fn first_text_within(element: ElementRef<'_>, css: &str) -> Option<String> {
    select_within(element, css)
        .into_iter()
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn image_source(element: ElementRef<'_>) -> Option<&str> {
    ["src", "data-src", "data-lazy-src"]
        .iter()
        .filter_map(|a| element.value().attr(a))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

#[derive(Default)]
struct ImageSet {
    images: Vec<Image>,
    seen: HashSet<String>,
}

impl ImageSet {
    fn push(&mut self, doc: &ParsedDocument, raw: &str, kind: ImageKind) {
        if let Some(url) = doc.resolve_url(raw)
            && self.seen.insert(url.clone())
        {
            self.images.push(Image { url, kind });
        }
    }

    fn push_json_list(&mut self, doc: &ParsedDocument, value: &Value, kind: ImageKind) {
        match value {
            Value::String(s) => self.push(doc, s, kind),
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_str) {
                    self.push(doc, item, kind);
                }
            }
            _ => {}
        }
    }
}

/// Main image, gallery, thumbnails, og:image and video, deduplicated by URL.
pub fn extract_images(doc: &ParsedDocument) -> Vec<Image> {
    let mut set = ImageSet::default();

    for css in [
        ".magnifier--image--EYYoSlr",
        ".product-main-image img",
        ".main-image img",
        r#"[data-pl="main-image"] img"#,
    ] {
        if let Some(src) = doc.select(css).into_iter().find_map(image_source) {
            set.push(doc, src, ImageKind::Main);
            break;
        }
    }

    let mut has_gallery = false;
    if let Some(list) = doc.embedded("/runParams/data/imageModule/imagePathList") {
        set.push_json_list(doc, list, ImageKind::Gallery);
        has_gallery = true;
    }
    if let Some(list) = doc.embedded("/runParams/data/imageModule/summImagePathList") {
        set.push_json_list(doc, list, ImageKind::Thumbnail);
    }

    if !has_gallery {
        static GALLERY: std::sync::LazyLock<Regex> =
            std::sync::LazyLock::new(|| scan(r#""imagePathList"\s*:\s*(\[[^\]]*\])"#));
        static THUMBS: std::sync::LazyLock<Regex> =
            std::sync::LazyLock::new(|| scan(r#""summImagePathList"\s*:\s*(\[[^\]]*\])"#));

        for (re, kind) in [(&*GALLERY, ImageKind::Gallery), (&*THUMBS, ImageKind::Thumbnail)] {
            let list = doc
                .scripts()
                .iter()
                .filter_map(|s| first_capture(re, s))
                .find_map(|raw| serde_json::from_str::<Value>(&raw).ok());
            if let Some(list) = list {
                has_gallery |= kind == ImageKind::Gallery;
                set.push_json_list(doc, &list, kind);
            }
        }
    }

    if !has_gallery {
        for element in doc.select(".image-gallery img, .product-images img, .slider--img--D7MJNPZ img") {
            if let Some(src) = image_source(element) {
                set.push(doc, src, ImageKind::Gallery);
            }
        }
    }

    if let Some(image) = doc.embedded("/ld_json/image") {
        set.push_json_list(doc, image, ImageKind::Gallery);
    }
    if let Some(og) = doc.meta("og:image") {
        set.push(doc, &og, ImageKind::Og);
    }
    if let Some(video) = doc
        .select("video source, video, .product-video")
        .into_iter()
        .find_map(image_source)
    {
        set.push(doc, video, ImageKind::Video);
    }

    set.images
}

/// Variation axes from the SKU picker, falling back to the embedded SKU
/// property list.
pub fn extract_variations(doc: &ParsedDocument) -> Vec<Variation> {
    let mut variations = Vec::new();

    for wrapper in doc.select(".sku--wrap--xgoW06M, .product-sku, .sku-wrap") {
        for item in select_within(wrapper, ".sku-item--wrap--t9Qszzx, .sku-item") {
            let Some(title) = first_text_within(item, ".sku-item--title--Z0HLO87, .variation-title")
            else {
                continue;
            };
            let name = title
                .split(':')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();

            let options: Vec<VariationOption> = select_within(item, "[data-sku-col], .variation-option")
                .into_iter()
                .filter_map(|option| parse_variation_option(doc, option))
                .collect();

            if !name.is_empty() && !options.is_empty() {
                variations.push(Variation { name, options });
            }
        }
        if !variations.is_empty() {
            return variations;
        }
    }

    let list = doc
        .embedded("/runParams/data/skuModule/productSKUPropertyList")
        .or_else(|| doc.embedded("/runParams/data/skuComponent/productSKUPropertyList"));
    if let Some(Value::Array(props)) = list {
        for prop in props {
            let Some(name) = prop.get("skuPropertyName").and_then(Value::as_str) else {
                continue;
            };
            let options: Vec<VariationOption> = prop
                .get("skuPropertyValues")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .map(|v| VariationOption {
                            text: ["propertyValueDisplayName", "propertyValueName"]
                                .iter()
                                .find_map(|k| v.get(*k).and_then(Value::as_str))
                                .map(normalize_whitespace)
                                .filter(|t| !t.is_empty()),
                            image: v
                                .get("skuPropertyImagePath")
                                .and_then(Value::as_str)
                                .and_then(|src| doc.resolve_url(src)),
                            alt_text: v
                                .get("skuPropertyTips")
                                .and_then(Value::as_str)
                                .map(String::from),
                            selected: false,
                            sold_out: false,
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !options.is_empty() {
                variations.push(Variation {
                    name: normalize_whitespace(name),
                    options,
                });
            }
        }
    }

    variations
}

fn parse_variation_option(doc: &ParsedDocument, option: ElementRef<'_>) -> Option<VariationOption> {
    let img = select_within(option, "img").into_iter().next();
    let text = element_text(option);
    let classes: Vec<&str> = option.value().classes().collect();

    let parsed = VariationOption {
        text: (!text.is_empty()).then_some(text),
        image: img
            .and_then(image_source)
            .and_then(|src| doc.resolve_url(src)),
        alt_text: img
            .and_then(|i| i.value().attr("alt"))
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from),
        selected: classes.iter().any(|c| c.contains("selected")),
        sold_out: classes
            .iter()
            .any(|c| c.contains("soldOut") || c.contains("sold-out")),
    };

    (parsed.text.is_some() || parsed.image.is_some()).then_some(parsed)
}

/// Up to ten reviews from the feedback list.
pub fn extract_reviews(doc: &ParsedDocument) -> Vec<Review> {
    doc.select(".list--itemDesc--JcxNPy5, .review-item, .feedback-item")
        .into_iter()
        .map(|item| parse_review(doc, item))
        .filter(|r| !r.is_empty())
        .take(MAX_REVIEWS)
        .collect()
}

fn parse_review(doc: &ParsedDocument, item: ElementRef<'_>) -> Review {
    let rating = select_within(item, ".rating, .stars")
        .into_iter()
        .next()
        .and_then(|el| {
            el.value()
                .attr("data-rating")
                .and_then(crate::value::parse_decimal)
                .or_else(|| crate::value::parse_decimal(&element_text(el)))
                // `star-4` style classes use `-` as a separator, not a sign.
                .or_else(|| {
                    el.value()
                        .classes()
                        .find_map(|c| crate::value::parse_decimal(c).map(f64::abs))
                })
        })
        .filter(|r| (0.0..=5.0).contains(r));

    Review {
        reviewer: first_text_within(item, ".reviewer-info, .review-author, .list--itemInfo--VEcgSFh"),
        text: first_text_within(item, ".review-text, .review-content, .list--itemReview--d9Z9Z5Z"),
        rating,
        sku: first_text_within(item, ".sku-info, .variant-info, .list--itemSku--idEQSGC"),
        images: select_within(item, ".review-image img")
            .into_iter()
            .filter_map(image_source)
            .filter_map(|src| doc.resolve_url(src))
            .collect(),
    }
}

pub fn extract_shipping_methods(doc: &ParsedDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    doc.select(".shipping-method, .delivery-option")
        .into_iter()
        .map(element_text)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Specification table rows, then the embedded property list, then
/// `Key: Value` lines in the description.
pub fn extract_specifications(doc: &ParsedDocument) -> BTreeMap<String, String> {
    let mut specs = BTreeMap::new();

    for row in doc.select(".product-specs table tr, .specifications table tr, .product-props table tr") {
        let cells: Vec<String> = select_within(row, "td, th")
            .into_iter()
            .map(element_text)
            .collect();
        if let [key, value, ..] = cells.as_slice()
            && !key.is_empty()
            && !value.is_empty()
        {
            specs.insert(key.trim_end_matches(':').trim().to_string(), value.clone());
        }
    }

    for prop in doc.select(".specification--prop--Jh28bKu") {
        let key = first_text_within(prop, ".specification--title--SfH3sA8");
        let value = first_text_within(prop, ".specification--desc--Dxx6W0W");
        if let (Some(key), Some(value)) = (key, value) {
            specs.insert(key, value);
        }
    }
    if !specs.is_empty() {
        return specs;
    }

    let props = doc
        .embedded("/runParams/data/specsModule/props")
        .or_else(|| doc.embedded("/runParams/data/productPropComponent/props"));
    if let Some(Value::Array(props)) = props {
        for prop in props {
            let key = prop.get("attrName").and_then(Value::as_str);
            let value = prop.get("attrValue").and_then(Value::as_str);
            if let (Some(key), Some(value)) = (key, value) {
                let (key, value) = (normalize_whitespace(key), normalize_whitespace(value));
                if !key.is_empty() && !value.is_empty() {
                    specs.insert(key, value);
                }
            }
        }
    }
    if !specs.is_empty() {
        return specs;
    }

    static KEY_VALUE: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| scan(r"^\s*([A-Za-z][A-Za-z ]{0,48}?)\s*:\s*(\S.{0,198})$"));

    for description in doc.select(".product-description, .item-description") {
        let text: String = description.text().collect();
        for line in text.lines() {
            if specs.len() >= MAX_DESCRIPTION_SPECS {
                break;
            }
            if let Some(caps) = KEY_VALUE.captures(line) {
                specs.insert(caps[1].trim().to_string(), caps[2].trim().to_string());
            }
        }
    }

    specs
}

/// OpenGraph (`og_*`), app-link, Twitter card and descriptive meta tags.
pub fn extract_meta_tags(doc: &ParsedDocument) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for meta in doc.select("meta[property], meta[name]") {
        let element = meta.value();
        let Some(key) = element.attr("property").or_else(|| element.attr("name")) else {
            continue;
        };
        let Some(content) = element.attr("content").map(str::trim).filter(|c| !c.is_empty())
        else {
            continue;
        };

        if let Some(prop) = key.strip_prefix("og:") {
            tags.insert(format!("og_{prop}"), content.to_string());
        } else if key.starts_with("al:") || key.starts_with("twitter:") {
            tags.insert(key.to_string(), content.to_string());
        } else if matches!(key, "description" | "keywords" | "author") {
            tags.insert(key.to_string(), content.to_string());
        }
    }
    tags
}

/// `<html lang>`, then `<meta name="language">`, then a guess from
/// characteristic letters, then `en`.
pub fn detect_language(doc: &ParsedDocument) -> String {
    if let Some(lang) = doc.html_lang() {
        return lang;
    }
    if let Some(lang) = doc.select_attr(r#"meta[name="language"]"#, "content") {
        return lang;
    }

    let sample: String = doc.text().chars().take(1000).collect();
    let has_any = |letters: &str| sample.chars().any(|c| letters.contains(c));
    if has_any("ąćęłńśźżĄĆĘŁŃŚŹŻ") {
        "pl".to_string()
    } else if has_any("ßẞäöüÄÖÜ") {
        "de".to_string()
    } else if has_any("àâçèéêëîïôùûœÀÂÇÈÉÊËÎÏÔÙÛŒ") {
        "fr".to_string()
    } else {
        "en".to_string()
    }
}
