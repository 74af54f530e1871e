use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use hermes_core::models::Record;

/// One flat CSV line per record.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    url: &'a str,
    title: Option<&'a str>,
    product_id: Option<&'a str>,
    category: Option<&'a str>,
    brand: Option<&'a str>,
    current_price: Option<f64>,
    currency: Option<&'a str>,
    original_price: Option<f64>,
    discount_percent: Option<f64>,
    rating: Option<f64>,
    review_count: Option<u64>,
    sold_count: Option<u64>,
    store_name: Option<&'a str>,
    store_rating: Option<f64>,
    free_shipping: Option<&'a str>,
    delivery_time: Option<&'a str>,
    image_count: usize,
    variation_count: usize,
    specification_count: usize,
    page_language: Option<&'a str>,
    scraped_at: String,
}

impl<'a> From<&'a Record> for CsvRow<'a> {
    fn from(r: &'a Record) -> Self {
        let current = r.pricing.current_price.as_ref();
        Self {
            url: &r.url,
            title: r.basic_info.title.as_deref(),
            product_id: r.basic_info.product_id.as_deref(),
            category: r.basic_info.category.as_deref(),
            brand: r.basic_info.brand.as_deref(),
            current_price: current.map(|p| p.value),
            currency: current.map(|p| p.currency.as_str()),
            original_price: r.pricing.original_price.as_ref().map(|p| p.value),
            discount_percent: r.pricing.discount_percent,
            rating: r.reviews_and_ratings.rating,
            review_count: r.reviews_and_ratings.review_count,
            sold_count: r.reviews_and_ratings.sold_count,
            store_name: r.seller_info.store_name.as_deref(),
            store_rating: r.seller_info.store_rating,
            free_shipping: r.shipping_info.free_shipping.as_deref(),
            delivery_time: r.shipping_info.delivery_time.as_deref(),
            image_count: r.images.len(),
            variation_count: r.product_variations.len(),
            specification_count: r.specifications.len(),
            page_language: r.page_language.as_deref(),
            scraped_at: r.scraped_at.to_rfc3339(),
        }
    }
}

/// Write records as CSV with a header row.
pub fn write_csv(path: &Path, records: &[Record]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    for record in records {
        writer
            .serialize(CsvRow::from(record))
            .with_context(|| format!("Failed to write CSV row for {}", record.url))?;
    }
    writer.flush().context("Failed to flush CSV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::models::Price;

    #[test]
    fn test_write_csv_flattens_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");

        let mut lamp = Record::new("https://shop.test/item/1.html");
        lamp.basic_info.title = Some("Desk Lamp, brass".into());
        lamp.pricing.current_price = Some(Price {
            value: 12.5,
            currency: "USD".into(),
            raw: "US $12.50".into(),
        });
        let empty = Record::new("https://shop.test/item/2.html");

        write_csv(&path, &[lamp, empty]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("url,title,product_id"));
        assert!(lines[1].contains("\"Desk Lamp, brass\""));
        assert!(lines[1].contains(",12.5,USD,"));
        assert!(lines[2].starts_with("https://shop.test/item/2.html,,"));
    }
}
