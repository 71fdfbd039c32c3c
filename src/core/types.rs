use serde::{Deserialize, Serialize};

/// Which storefront a work item targets. The two sources tolerate automated
/// traffic very differently, so the orchestrator gives each its own queue,
/// concurrency bound and session strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Amazon,
    Walmart,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Amazon => write!(f, "Amazon"),
            SourceKind::Walmart => write!(f, "Walmart"),
        }
    }
}

/// One unit of work: a single SKU to resolve against one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(rename = "Type")]
    pub source: SourceKind,
    #[serde(rename = "SKU")]
    pub sku: String,
}

/// The input work list (`skus.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkList {
    pub skus: Vec<WorkItem>,
}

/// Raw extraction result for one product, as pulled off the page.
/// Field values are uncleaned page text; normalization happens when the
/// row is written out (see `output`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedProduct {
    pub sku: String,
    pub title: String,
    pub price: String,
    pub rating: String,
    pub reviews: String,
    pub description: String,
}

/// Outcome counters for one full run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn merge(self, other: RunSummary) -> RunSummary {
        RunSummary {
            total: self.total + other.total,
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
        }
    }
}
