//! Per-source capability agents.
//!
//! Each source implements the same small capability surface,
//! `{navigate, extract_product, detect_challenge, solve_challenge}`, and
//! the orchestrator dispatches over [`SourceKind`]. The DOM/selector
//! details in here are deliberately thin wrappers; the interesting logic
//! lives in the session, stealth, and scheduling layers.

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::errors::ScrapeError;
use crate::core::types::{ScrapedProduct, SourceKind};
use crate::stealth::challenge::{self, ChallengeSolver};
use crate::stealth::humanize::{self, Point};

#[async_trait]
pub trait SourceAgent: Send + Sync {
    /// Bring the page to the SKU's product (or search-result) view.
    async fn navigate(&self, page: &Page, sku: &str) -> Result<(), ScrapeError>;

    /// Pull the product record off the current page. `Ok(None)` means the
    /// page rendered but carried no matching product.
    async fn extract_product(
        &self,
        page: &Page,
        sku: &str,
    ) -> Result<Option<ScrapedProduct>, ScrapeError>;

    /// Is a verification gate currently blocking the page?
    async fn detect_challenge(&self, page: &Page) -> Result<bool, ScrapeError>;

    /// Attempt to clear the gate. Never errors; `false` is session-fatal.
    async fn solve_challenge(&self, page: &Page) -> bool;
}

pub fn agent_for(source: SourceKind) -> &'static dyn SourceAgent {
    match source {
        SourceKind::Amazon => &AmazonAgent,
        SourceKind::Walmart => &WalmartAgent,
    }
}

/// Poll until `selector` appears or `timeout` elapses.
async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> bool {
    let script = format!(
        "!!document.querySelector({})",
        serde_json::to_string(selector).expect("selector encodes as JSON")
    );
    let started = Instant::now();
    while started.elapsed() < timeout {
        let present = page
            .evaluate(script.as_str())
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false);
        if present {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

async fn page_html(page: &Page) -> Result<String, ScrapeError> {
    page.content()
        .await
        .map_err(|e| ScrapeError::from_browser_error("content", e))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ── Amazon ──────────────────────────────────────────────────────────────────

pub struct AmazonAgent;

#[derive(Debug, Deserialize)]
struct AmazonHit {
    asin: String,
    title: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    reviews: String,
}

const AMAZON_RESULTS_SCRIPT: &str = r#"
(() => {
    const getText = (root, sels) => {
        for (const s of sels) {
            const el = root.querySelector(s);
            if (el && el.textContent && el.textContent.trim()) return el.textContent.trim();
        }
        return '';
    };
    const items = Array.from(
        document.querySelectorAll('[data-component-type="s-search-result"], .s-result-item[data-asin]')
    ).filter(el => el.getAttribute('data-asin'));
    return items.map(el => ({
        asin: el.getAttribute('data-asin'),
        title: getText(el, [
            'h2 a.a-link-normal span',
            '[data-cy="title-recipe"] h2 span',
            '.a-size-medium.a-color-base.a-text-normal',
            '.a-size-base-plus.a-color-base.a-text-normal',
        ]),
        price: getText(el, [
            '.a-price:not([data-a-strike="true"]) .a-offscreen',
            'span.a-color-price',
        ]),
        rating: getText(el, ['.a-icon-star-small span', '.a-icon-alt']),
        reviews: getText(el, ['span[aria-label*="stars"] + span', '.a-size-base.s-underline-text']),
    })).filter(p => p.title);
})()
"#;

#[async_trait]
impl SourceAgent for AmazonAgent {
    async fn navigate(&self, page: &Page, sku: &str) -> Result<(), ScrapeError> {
        let url = format!("https://www.amazon.com/s?k={}", sku);
        page.goto(url)
            .await
            .map_err(|e| ScrapeError::from_browser_error("amazon navigate", e))?;
        humanize::random_delay(2000, 3000).await;
        Ok(())
    }

    async fn extract_product(
        &self,
        page: &Page,
        sku: &str,
    ) -> Result<Option<ScrapedProduct>, ScrapeError> {
        let hits: Vec<AmazonHit> = page
            .evaluate(AMAZON_RESULTS_SCRIPT)
            .await
            .map_err(|e| ScrapeError::from_browser_error("amazon extract", e))?
            .into_value()
            .map_err(|e| ScrapeError::TransientFetch(format!("amazon result decode: {}", e)))?;

        let hit = match hits.iter().find(|h| h.asin == sku) {
            Some(exact) => exact,
            None => match hits.first() {
                Some(top) => {
                    info!("amazon: no exact ASIN match for {}, taking top result {}", sku, top.asin);
                    top
                }
                None => return Ok(None),
            },
        };

        Ok(Some(ScrapedProduct {
            sku: hit.asin.clone(),
            title: hit.title.clone(),
            price: hit.price.clone(),
            rating: hit.rating.clone(),
            reviews: hit.reviews.clone(),
            description: "Amazon Product".into(),
        }))
    }

    async fn detect_challenge(&self, page: &Page) -> Result<bool, ScrapeError> {
        let html = page_html(page).await?;
        Ok(html.contains("Enter the characters you see below")
            || html.contains("Type the characters you see in this image"))
    }

    async fn solve_challenge(&self, _page: &Page) -> bool {
        // Amazon's character captcha has no interactive hold to emulate;
        // the item is retried on a fresh ephemeral instance instead.
        warn!("amazon: challenge present, no solver for this gate");
        false
    }
}

// ── Walmart ─────────────────────────────────────────────────────────────────

pub struct WalmartAgent;

const WALMART_TITLE_SELECTOR: &str = "[data-automation-id=\"product-title\"]";
const WALMART_CHALLENGE_SELECTOR: &str = "#px-captcha";

#[derive(Debug, Deserialize)]
struct WalmartHit {
    title: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    reviews: String,
}

const WALMART_PRODUCT_SCRIPT: &str = r#"
(() => {
    const getText = (sels) => {
        for (const s of sels) {
            const el = document.querySelector(s);
            if (el && el.textContent && el.textContent.trim()) return el.textContent.trim();
        }
        return '';
    };
    const title = getText(['[data-automation-id="product-title"]', 'h1[itemprop="name"]']);
    if (!title) return null;
    return {
        title,
        price: getText(['[data-seo-id="hero-price"]', '[data-automation-id="product-price"]', '[itemprop="price"]']),
        rating: getText(['.f7.ph1', '[data-testid="product-ratings"]']),
        reviews: getText(['[data-testid="item-review-section-link"]', '.reviews-count']),
    };
})()
"#;

#[async_trait]
impl SourceAgent for WalmartAgent {
    async fn navigate(&self, page: &Page, sku: &str) -> Result<(), ScrapeError> {
        let url = format!("https://www.walmart.com/ip/{}", sku);
        page.goto(url)
            .await
            .map_err(|e| ScrapeError::from_browser_error("walmart navigate", e))?;
        humanize::random_delay(2000, 3000).await;
        Ok(())
    }

    async fn extract_product(
        &self,
        page: &Page,
        sku: &str,
    ) -> Result<Option<ScrapedProduct>, ScrapeError> {
        if !wait_for_selector(page, WALMART_TITLE_SELECTOR, Duration::from_secs(10)).await {
            return Ok(None);
        }

        let hit: Option<WalmartHit> = page
            .evaluate(WALMART_PRODUCT_SCRIPT)
            .await
            .map_err(|e| ScrapeError::from_browser_error("walmart extract", e))?
            .into_value()
            .map_err(|e| ScrapeError::TransientFetch(format!("walmart product decode: {}", e)))?;

        Ok(hit.map(|h| ScrapedProduct {
            sku: sku.to_string(),
            title: truncate_chars(&h.title, 200),
            price: if h.price.is_empty() { "N/A".into() } else { h.price },
            rating: h.rating,
            reviews: h.reviews,
            description: "Walmart Product".into(),
        }))
    }

    async fn detect_challenge(&self, page: &Page) -> Result<bool, ScrapeError> {
        let html = page_html(page).await?;
        Ok(challenge::detect(&html))
    }

    /// Press-and-hold gate: locate the widget and run the full solver
    /// sequence against its center.
    async fn solve_challenge(&self, page: &Page) -> bool {
        let Ok(widget) = page.find_element(WALMART_CHALLENGE_SELECTOR).await else {
            warn!("walmart: challenge markers present but no widget to hold");
            return false;
        };
        let Ok(point) = widget.clickable_point().await else {
            warn!("walmart: challenge widget has no clickable point");
            return false;
        };

        let mut solver = ChallengeSolver::new();
        solver.mark_detected();
        solver.solve(page, Point::new(point.x, point.y)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_dispatch_covers_both_sources() {
        // Dispatch is over the source-kind tag; both arms must resolve.
        let _amazon: &dyn SourceAgent = agent_for(SourceKind::Amazon);
        let _walmart: &dyn SourceAgent = agent_for(SourceKind::Walmart);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("ok", 200), "ok");
    }

    #[test]
    fn test_extraction_scripts_are_self_contained() {
        // Both scripts are IIFEs so `evaluate` returns their value directly.
        assert!(AMAZON_RESULTS_SCRIPT.trim_start().starts_with("(() =>"));
        assert!(WALMART_PRODUCT_SCRIPT.trim_start().starts_with("(() =>"));
        assert!(WALMART_PRODUCT_SCRIPT.contains("product-title"));
    }
}
