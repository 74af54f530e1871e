//! Derived statistics over persisted records.
//!
//! Everything here reads records back from the output directory, so a report
//! can be rebuilt at any time without fetching again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::BatchSummary;
use crate::error::AppError;
use crate::models::Record;
use crate::sink::FailureEntry;

pub const ANALYSIS_FILE: &str = "analysis_report.json";

const TOP_N: usize = 20;
const TOP_SELLERS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "for", "and", "the", "with", "to", "of", "in", "on", "at", "by", "is", "are", "new", "hot",
    "free", "shipping", "sale", "best", "high", "quality",
];

/// (label, exclusive upper bound) in units of the price's own currency.
const PRICE_RANGES: &[(&str, f64)] = &[
    ("0-10", 10.0),
    ("10-25", 25.0),
    ("25-50", 50.0),
    ("50-100", 100.0),
    ("100-250", 250.0),
    ("250+", f64::INFINITY),
];

/// (label, inclusive lower bound), highest first.
const RATING_RANGES: &[(&str, f64)] = &[
    ("4.5-5.0", 4.5),
    ("4.0-4.5", 4.0),
    ("3.5-4.0", 3.5),
    ("3.0-3.5", 3.0),
    ("2.5-3.0", 2.5),
    ("Below 2.5", f64::NEG_INFINITY),
];

/// Contents of `batch_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub summary: BatchSummary,
    pub statistics: RecordStatistics,
    pub failures: Vec<FailureEntry>,
}

/// Contents of `analysis_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub data_directory: PathBuf,
    pub statistics: RecordStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStatistics {
    pub total_records: usize,
    pub pricing: PricingStatistics,
    pub ratings: RatingStatistics,
    pub catalog: CatalogStatistics,
    pub sellers: SellerStatistics,
}

/// Count, extremes, mean and median of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl NumericSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            count: values.len(),
            min: values.iter().copied().reduce(f64::min)?,
            max: values.iter().copied().reduce(f64::max)?,
            mean: mean(values)?,
            median: median(values)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub value: String,
    pub count: u64,
}

/// Price figures over the records priced in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPrices {
    pub currency: String,
    pub price: NumericSummary,
    pub price_ranges: Vec<Bucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingStatistics {
    /// Most common currency first. Amounts are never mixed across currencies.
    pub prices_by_currency: Vec<CurrencyPrices>,
    pub currency_distribution: Vec<Frequency>,
    pub discount: Option<NumericSummary>,
    /// Share of all records carrying a discount, in percent.
    pub discounted_share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStatistics {
    pub rating: Option<NumericSummary>,
    pub rating_distribution: Vec<Bucket>,
    pub reviews: Option<NumericSummary>,
    pub sales: Option<NumericSummary>,
    pub quality: QualityIndicators,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityIndicators {
    /// Rated 4.0 or above.
    pub high_rated: usize,
    pub high_rated_percent: f64,
    /// 100 reviews or more.
    pub well_reviewed: usize,
    pub well_reviewed_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStatistics {
    pub categories: Vec<Frequency>,
    pub brands: Vec<Frequency>,
    pub keywords: Vec<Frequency>,
    pub total_categories: usize,
    pub total_brands: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerStatistics {
    pub store_rating: Option<NumericSummary>,
    /// Store rating of 95% or above.
    pub high_rated_sellers: usize,
    pub years_in_business: Option<NumericSummary>,
    /// Five years or more.
    pub experienced_sellers: usize,
    pub followers: Option<NumericSummary>,
    /// 1000 followers or more.
    pub popular_sellers: usize,
    pub top_sellers: Vec<Frequency>,
}

/// Compute all statistics for a set of records.
pub fn analyze(records: &[Record]) -> RecordStatistics {
    RecordStatistics {
        total_records: records.len(),
        pricing: analyze_pricing(records),
        ratings: analyze_ratings(records),
        catalog: analyze_catalog(records),
        sellers: analyze_sellers(records),
    }
}

fn analyze_pricing(records: &[Record]) -> PricingStatistics {
    let mut prices: HashMap<String, Vec<f64>> = HashMap::new();
    let mut discounts = Vec::new();

    for record in records {
        if let Some(price) = &record.pricing.current_price {
            prices.entry(price.currency.clone()).or_default().push(price.value);
        }
        if let Some(discount) = record.pricing.discount_percent {
            discounts.push(discount);
        }
    }

    let discounted_share = if records.is_empty() {
        0.0
    } else {
        discounts.len() as f64 / records.len() as f64 * 100.0
    };

    let currency_distribution = top_frequencies(
        prices
            .iter()
            .map(|(currency, values)| (currency.clone(), values.len() as u64))
            .collect(),
        usize::MAX,
    );
    let prices_by_currency = currency_distribution
        .iter()
        .filter_map(|f| {
            let values = prices.get(&f.value)?;
            Some(CurrencyPrices {
                currency: f.value.clone(),
                price: NumericSummary::from_values(values)?,
                price_ranges: categorize_prices(values),
            })
        })
        .collect();

    PricingStatistics {
        prices_by_currency,
        currency_distribution,
        discount: NumericSummary::from_values(&discounts),
        discounted_share,
    }
}

fn analyze_ratings(records: &[Record]) -> RatingStatistics {
    let ratings: Vec<f64> = records
        .iter()
        .filter_map(|r| r.reviews_and_ratings.rating)
        .collect();
    let reviews: Vec<f64> = records
        .iter()
        .filter_map(|r| r.reviews_and_ratings.review_count)
        .map(|n| n as f64)
        .collect();
    let sales: Vec<f64> = records
        .iter()
        .filter_map(|r| r.reviews_and_ratings.sold_count)
        .map(|n| n as f64)
        .collect();

    let high_rated = ratings.iter().filter(|&&r| r >= 4.0).count();
    let well_reviewed = reviews.iter().filter(|&&n| n >= 100.0).count();

    RatingStatistics {
        rating: NumericSummary::from_values(&ratings),
        rating_distribution: categorize_ratings(&ratings),
        reviews: NumericSummary::from_values(&reviews),
        sales: NumericSummary::from_values(&sales),
        quality: QualityIndicators {
            high_rated,
            high_rated_percent: percent(high_rated, ratings.len()),
            well_reviewed,
            well_reviewed_percent: percent(well_reviewed, reviews.len()),
        },
    }
}

fn analyze_catalog(records: &[Record]) -> CatalogStatistics {
    let mut categories: HashMap<String, u64> = HashMap::new();
    let mut brands: HashMap<String, u64> = HashMap::new();
    let mut keywords: HashMap<String, u64> = HashMap::new();

    for record in records {
        let category = record
            .basic_info
            .category
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        *categories.entry(category).or_default() += 1;

        let brand = record.basic_info.brand.clone().or_else(|| {
            record
                .specifications
                .get("Brand")
                .or_else(|| record.specifications.get("brand"))
                .or_else(|| record.specifications.get("Brand Name"))
                .cloned()
        });
        if let Some(brand) = brand.filter(|b| !b.is_empty() && b != "Unknown") {
            *brands.entry(brand).or_default() += 1;
        }

        if let Some(title) = &record.basic_info.title {
            for word in title_keywords(title) {
                *keywords.entry(word).or_default() += 1;
            }
        }
    }

    CatalogStatistics {
        total_categories: categories.len(),
        total_brands: brands.len(),
        categories: top_frequencies(categories, TOP_N),
        brands: top_frequencies(brands, TOP_N),
        keywords: top_frequencies(keywords, TOP_N),
    }
}

fn analyze_sellers(records: &[Record]) -> SellerStatistics {
    let mut ratings = Vec::new();
    let mut years = Vec::new();
    let mut followers = Vec::new();
    let mut names: HashMap<String, u64> = HashMap::new();

    for record in records {
        let seller = &record.seller_info;
        if let Some(r) = seller.store_rating {
            ratings.push(r);
        }
        if let Some(y) = seller.years_in_business {
            years.push(y as f64);
        }
        if let Some(f) = seller.followers {
            followers.push(f as f64);
        }
        if let Some(name) = &seller.store_name {
            *names.entry(name.clone()).or_default() += 1;
        }
    }

    SellerStatistics {
        high_rated_sellers: ratings.iter().filter(|&&r| r >= 95.0).count(),
        experienced_sellers: years.iter().filter(|&&y| y >= 5.0).count(),
        popular_sellers: followers.iter().filter(|&&f| f >= 1000.0).count(),
        store_rating: NumericSummary::from_values(&ratings),
        years_in_business: NumericSummary::from_values(&years),
        followers: NumericSummary::from_values(&followers),
        top_sellers: top_frequencies(names, TOP_SELLERS),
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Middle value; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

pub fn categorize_prices(prices: &[f64]) -> Vec<Bucket> {
    let mut counts = vec![0u64; PRICE_RANGES.len()];
    for &price in prices {
        let idx = PRICE_RANGES
            .iter()
            .position(|(_, upper)| price < *upper)
            .unwrap_or(PRICE_RANGES.len() - 1);
        counts[idx] += 1;
    }
    PRICE_RANGES
        .iter()
        .zip(counts)
        .map(|((label, _), count)| Bucket {
            label: label.to_string(),
            count,
        })
        .collect()
}

pub fn categorize_ratings(ratings: &[f64]) -> Vec<Bucket> {
    let mut counts = vec![0u64; RATING_RANGES.len()];
    for &rating in ratings {
        let idx = RATING_RANGES
            .iter()
            .position(|(_, lower)| rating >= *lower)
            .unwrap_or(RATING_RANGES.len() - 1);
        counts[idx] += 1;
    }
    RATING_RANGES
        .iter()
        .zip(counts)
        .map(|((label, _), count)| Bucket {
            label: label.to_string(),
            count,
        })
        .collect()
}

/// Lowercased alphabetic words of three letters or more, minus stop words.
pub fn title_keywords(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_alphabetic()))
        .filter(|w| !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Most frequent first; ties broken alphabetically.
fn top_frequencies(counts: HashMap<String, u64>, n: usize) -> Vec<Frequency> {
    let mut entries: Vec<Frequency> = counts
        .into_iter()
        .map(|(value, count)| Frequency { value, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    entries.truncate(n);
    entries
}

/// Load every `product_*.json` record in a directory.
///
/// Files that fail to parse are logged and skipped.
pub async fn load_records(dir: &Path) -> Result<Vec<Record>, AppError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        AppError::InputError(format!("cannot read records from {}: {e}", dir.display()))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_record = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("product_") && n.ends_with(".json"));
        if is_record {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str::<Record>(&content) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record");
            }
        }
    }

    tracing::info!(count = records.len(), dir = %dir.display(), "Loaded records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Price;

    fn record(title: &str, price: Option<f64>, rating: Option<f64>, reviews: Option<u64>) -> Record {
        let mut r = Record::new("https://shop.test/item/1.html");
        r.basic_info.title = Some(title.to_string());
        r.pricing.current_price = price.map(|value| Price {
            value,
            currency: "USD".into(),
            raw: format!("${value}"),
        });
        r.reviews_and_ratings.rating = rating;
        r.reviews_and_ratings.review_count = reviews;
        r
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_price_buckets() {
        let buckets = categorize_prices(&[5.0, 10.0, 24.99, 60.0, 250.0, 1000.0]);
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 2, 0, 1, 0, 2]);
        assert_eq!(buckets[0].label, "0-10");
        assert_eq!(buckets[5].label, "250+");
    }

    #[test]
    fn test_prices_are_grouped_by_currency() {
        let mut records = vec![
            record("Lamp", Some(12.0), None, None),
            record("Mouse", Some(8.0), None, None),
            record("Cable", Some(20.0), None, None),
        ];
        for (value, currency) in [(49.99, "PLN"), (300.0, "PLN"), (9.0, "EUR")] {
            let mut r = record("Import", None, None, None);
            r.pricing.current_price = Some(Price {
                value,
                currency: currency.into(),
                raw: format!("{value} {currency}"),
            });
            records.push(r);
        }

        let pricing = analyze(&records).pricing;
        let currencies: Vec<&str> = pricing
            .prices_by_currency
            .iter()
            .map(|p| p.currency.as_str())
            .collect();
        assert_eq!(currencies, vec!["USD", "PLN", "EUR"]);

        let usd = &pricing.prices_by_currency[0];
        assert_eq!(usd.price.count, 3);
        assert_eq!(usd.price.max, 20.0);
        assert_eq!(usd.price.median, 12.0);

        let pln = &pricing.prices_by_currency[1];
        assert_eq!(pln.price.min, 49.99);
        assert_eq!(pln.price.max, 300.0);
        let pln_counts: Vec<u64> = pln.price_ranges.iter().map(|b| b.count).collect();
        assert_eq!(pln_counts, vec![0, 0, 1, 0, 0, 1]);

        assert_eq!(pricing.prices_by_currency[2].price.count, 1);
    }

    #[test]
    fn test_rating_buckets() {
        let buckets = categorize_ratings(&[5.0, 4.5, 4.2, 3.0, 2.0, 0.0]);
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 0, 1, 0, 2]);
        assert_eq!(buckets[5].label, "Below 2.5");
    }

    #[test]
    fn test_title_keywords_drop_stop_words() {
        let words = title_keywords("New Wireless Earbuds for iPhone, Bluetooth 5.3 with Mic");
        assert_eq!(words, vec!["wireless", "earbuds", "iphone", "bluetooth", "mic"]);
    }

    #[test]
    fn test_analyze() {
        let records = vec![
            record("Wireless Earbuds", Some(12.0), Some(4.8), Some(250)),
            record("Wireless Mouse", Some(8.0), Some(3.9), Some(20)),
            record("Desk Lamp", None, None, None),
        ];
        let stats = analyze(&records);

        assert_eq!(stats.total_records, 3);
        let usd = &stats.pricing.prices_by_currency[0];
        assert_eq!(usd.currency, "USD");
        let price = &usd.price;
        assert_eq!(price.count, 2);
        assert_eq!(price.min, 8.0);
        assert_eq!(price.max, 12.0);
        assert_eq!(price.median, 10.0);
        assert_eq!(
            stats.pricing.currency_distribution,
            vec![Frequency {
                value: "USD".into(),
                count: 2
            }]
        );

        assert_eq!(stats.ratings.quality.high_rated, 1);
        assert_eq!(stats.ratings.quality.well_reviewed, 1);
        assert!((stats.ratings.quality.high_rated_percent - 50.0).abs() < 1e-9);

        assert_eq!(stats.catalog.keywords[0].value, "wireless");
        assert_eq!(stats.catalog.keywords[0].count, 2);
        assert_eq!(stats.catalog.categories[0].value, "Unknown");
        assert_eq!(stats.catalog.total_brands, 0);
    }

    #[test]
    fn test_analyze_empty() {
        let stats = analyze(&[]);
        assert_eq!(stats.total_records, 0);
        assert!(stats.pricing.prices_by_currency.is_empty());
        assert_eq!(stats.pricing.discounted_share, 0.0);
        assert!(stats.sellers.top_sellers.is_empty());
    }

    #[test]
    fn test_brand_falls_back_to_specifications() {
        let mut r = record("Lamp", None, None, None);
        r.specifications.insert("Brand Name".into(), "Lumo".into());
        let stats = analyze(&[r]);
        assert_eq!(stats.catalog.brands[0].value, "Lumo");
    }

    #[tokio::test]
    async fn test_load_records_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let r = record("Lamp", Some(3.0), None, None);
        std::fs::write(
            dir.path().join("product_abc.json"),
            serde_json::to_string(&r).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("product_bad.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let records = load_records(dir.path()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].basic_info.title.as_deref(), Some("Lamp"));
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let records = vec![
            record("Wireless Earbuds", Some(12.0), Some(4.8), Some(250)),
            record("Desk Lamp", Some(30.0), Some(4.1), None),
        ];
        assert_eq!(analyze(&records), analyze(&records));
    }
}
