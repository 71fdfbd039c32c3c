//! Result and error channels.
//!
//! Both sinks are append-only and order-agnostic: concurrently-running
//! tasks push rows as they complete, and completion order across queues
//! carries no meaning. The CSV artifact is appended to when it already
//! exists, never silently overwritten.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing::{error, info};

use crate::core::types::{ScrapedProduct, SourceKind};

pub const CSV_HEADERS: [&str; 6] = [
    "SKU",
    "Source",
    "Title",
    "Description",
    "Price",
    "Number of Reviews and rating",
];

/// One output row, already normalized for the flat table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub sku: String,
    pub source: String,
    pub title: String,
    pub description: String,
    pub price: String,
    pub reviews_and_rating: String,
}

impl ProductRow {
    pub fn from_scraped(source: SourceKind, product: &ScrapedProduct) -> Self {
        ProductRow {
            sku: product.sku.clone(),
            source: source.to_string(),
            title: product.title.clone(),
            description: product.description.clone(),
            price: clean_price(&product.price),
            reviews_and_rating: format_reviews_and_rating(&product.rating, &product.reviews),
        }
    }
}

/// Append-only CSV sink. Writes the header only when creating a fresh file.
pub struct ProductSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProductSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, row: &ProductRow) -> Result<()> {
        let _guard = self.lock.lock().expect("product sink lock");

        let fresh = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(CSV_HEADERS)?;
        }
        writer.write_record([
            &row.sku,
            &row.source,
            &row.title,
            &row.description,
            &row.price,
            &row.reviews_and_rating,
        ])?;
        writer.flush()?;

        info!("output: saved {} ({})", row.sku, row.source);
        Ok(())
    }
}

/// Append-only, line-oriented error channel; one line per failed item.
pub struct ErrorSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn log(&self, sku: &str, source: SourceKind, message: &str) {
        let line = format!(
            "[{}] SKU: {} | Source: {} | Error: {}\n",
            Utc::now().to_rfc3339(),
            sku,
            source,
            message
        );
        error!("output: {} ({}): {}", sku, source, message);

        let _guard = self.lock.lock().expect("error sink lock");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            // The error channel itself failing must not take down a run.
            error!("output: error log append failed: {}", e);
        }
    }
}

// ── Field normalization ─────────────────────────────────────────────────────

static PRICE_RE: OnceLock<Regex> = OnceLock::new();
static NUMERIC_RE: OnceLock<Regex> = OnceLock::new();
static RATING_RE: OnceLock<Regex> = OnceLock::new();
static REVIEWS_RE: OnceLock<Regex> = OnceLock::new();

/// Strip storefront chrome ("current price", "Now … Was …") and extract the
/// currency-tagged amount; falls back to a bare number.
pub fn clean_price(price: &str) -> String {
    if price.trim().is_empty() {
        return "N/A".into();
    }

    let mut cleaned = price.to_string();
    for prefix in ["current price", "Now", "now"] {
        cleaned = cleaned.replacen(prefix, "", 1);
    }
    if let Some(pos) = cleaned.to_lowercase().find("was") {
        cleaned.truncate(pos);
    }
    let cleaned = cleaned.trim();

    let price_re = PRICE_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[$₹€£¥]|INR|USD|EUR)\s*[\d,]+\.?\d*").expect("valid price regex")
    });
    if let Some(m) = price_re.find(cleaned) {
        return m.as_str().to_string();
    }

    let numeric_re =
        NUMERIC_RE.get_or_init(|| Regex::new(r"[\d,]+\.?\d*").expect("valid numeric regex"));
    numeric_re
        .find(cleaned)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| cleaned.to_string())
}

/// Combine raw rating and review-count text into one column.
pub fn format_reviews_and_rating(rating: &str, reviews: &str) -> String {
    let rating_re =
        RATING_RE.get_or_init(|| Regex::new(r"\b(\d\.?\d?)\b").expect("valid rating regex"));
    let reviews_re = REVIEWS_RE
        .get_or_init(|| Regex::new(r"([\d,.]+[KMB]?)").expect("valid reviews regex"));

    let rating = rating_re
        .captures(rating)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let reviews = reviews_re
        .captures(reviews)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    match (rating.is_empty(), reviews.is_empty()) {
        (false, false) => format!("Rating: {}, Reviews: {}", rating, reviews),
        (false, true) => format!("Rating: {}", rating),
        (true, false) => format!("Reviews: {}", reviews),
        (true, true) => "N/A".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_price_strips_storefront_chrome() {
        assert_eq!(clean_price("current price $19.99"), "$19.99");
        assert_eq!(clean_price("Now $12.00 Was $25.00"), "$12.00");
        assert_eq!(clean_price("$1,299.00"), "$1,299.00");
    }

    #[test]
    fn test_clean_price_fallbacks() {
        assert_eq!(clean_price("19.99"), "19.99");
        assert_eq!(clean_price(""), "N/A");
        assert_eq!(clean_price("   "), "N/A");
    }

    #[test]
    fn test_format_reviews_and_rating_combinations() {
        assert_eq!(
            format_reviews_and_rating("4.5 out of 5 stars", "1,234 ratings"),
            "Rating: 4.5, Reviews: 1,234"
        );
        assert_eq!(format_reviews_and_rating("(4.2)", ""), "Rating: 4.2");
        assert_eq!(format_reviews_and_rating("", "98 reviews"), "Reviews: 98");
        assert_eq!(format_reviews_and_rating("", ""), "N/A");
    }

    #[test]
    fn test_product_sink_appends_without_duplicate_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.csv");
        let sink = ProductSink::new(path.clone());

        let product = ScrapedProduct {
            sku: "B01".into(),
            title: "Widget, deluxe \"edition\"".into(),
            price: "current price $9.99".into(),
            rating: "4.8 out of 5".into(),
            reviews: "321 ratings".into(),
            description: "Amazon Product".into(),
        };
        let row = ProductRow::from_scraped(SourceKind::Amazon, &product);
        sink.append(&row).unwrap();
        sink.append(&row).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_count = contents.matches("SKU,Source,Title").count();
        assert_eq!(header_count, 1, "header written exactly once:\n{contents}");
        assert_eq!(contents.lines().count(), 3); // header + 2 rows

        // CSV layer must quote the embedded comma and quotes.
        assert!(contents.contains(r#""Widget, deluxe ""edition""""#));
    }

    #[test]
    fn test_error_sink_line_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("errors.log");
        let sink = ErrorSink::new(path.clone());

        sink.log("577146302", SourceKind::Walmart, "challenge unresolved");
        sink.log("B0XYZ", SourceKind::Amazon, "Scrape returned null");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("SKU: 577146302 | Source: Walmart | Error: challenge unresolved"));
        assert!(lines[0].starts_with('['));
        assert!(lines[1].contains("Source: Amazon"));
    }
}
