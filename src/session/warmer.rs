//! Profile warming: accumulate trust signals (cookies, history) on a fresh
//! profile by browsing high-traffic destinations before the target site is
//! ever touched.
//!
//! Warming can never fail the caller: every step is caught and logged, and
//! the worst case is an unwarmed profile.

use chromiumoxide::Page;
use rand::Rng;
use tracing::{info, warn};

use super::WorkerSession;
use crate::stealth::humanize;

/// A session holding more cookies than this is considered already warmed.
pub const WARMED_COOKIE_THRESHOLD: usize = 5;

/// Threshold decision for skipping the itinerary entirely.
pub fn is_warmed(cookie_count: usize) -> bool {
    cookie_count > WARMED_COOKIE_THRESHOLD
}

struct Stop {
    url: &'static str,
    name: &'static str,
    scrolls: u32,
    dismiss_consent: bool,
    browse_around: bool,
}

/// Trusted, high-traffic destinations visited in order. The last stop is
/// the target storefront's home page so its own first-party cookies land
/// before any product page is requested.
const ITINERARY: &[Stop] = &[
    Stop {
        url: "https://www.google.com",
        name: "Google",
        scrolls: 0,
        dismiss_consent: true,
        browse_around: false,
    },
    Stop {
        url: "https://www.youtube.com",
        name: "YouTube",
        scrolls: 1,
        dismiss_consent: true,
        browse_around: false,
    },
    Stop {
        url: "https://www.walmart.com",
        name: "Walmart",
        scrolls: 2,
        dismiss_consent: true,
        browse_around: true,
    },
];

/// Consent-dialog dismissal candidates, tried in order; first match wins.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[aria-label*='Accept all']",
    "button[aria-label*='Accept']",
    "[aria-label*='Accept']",
    "button[id*='accept']",
];

/// Warm a session's profile.
///
/// With `skip_if_warmed`, a profile already past the cookie threshold is an
/// immediate no-op, so repeated calls on a reused profile cost nothing.
pub async fn warm(session: &WorkerSession, skip_if_warmed: bool) {
    let worker = session.worker_index;

    if skip_if_warmed {
        match session.page.get_cookies().await {
            Ok(cookies) if is_warmed(cookies.len()) => {
                info!(
                    "warmer: worker {} already warmed ({} cookies)",
                    worker,
                    cookies.len()
                );
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("warmer: worker {} cookie check failed: {}", worker, e),
        }
    }

    info!(
        "warmer: worker {} ({}) warming profile",
        worker, session.identity.name
    );
    for stop in ITINERARY {
        visit(&session.page, stop).await;
        humanize::random_delay(1000, 2000).await;
    }
    info!("warmer: worker {} warming complete", worker);
}

async fn visit(page: &Page, stop: &Stop) {
    if let Err(e) = page.goto(stop.url).await {
        warn!("warmer: failed to visit {}: {}", stop.name, e);
        return;
    }
    humanize::random_delay(1500, 2500).await;

    if stop.dismiss_consent {
        dismiss_consent(page).await;
    }

    for _ in 0..stop.scrolls {
        let distance = {
            let mut rng = rand::rng();
            rng.random_range(300.0..500.0)
        };
        if let Err(e) = humanize::scroll(page, distance, true).await {
            warn!("warmer: scroll on {} failed: {}", stop.name, e);
        }
        humanize::random_delay(800, 1500).await;
    }

    if stop.browse_around {
        browse_around(page).await;
    }

    info!("warmer: visited {}", stop.name);
}

/// Try each consent candidate in order; stop at the first that exists and
/// clicks. Silence on failure; consent dialogs are region-dependent.
async fn dismiss_consent(page: &Page) {
    for selector in CONSENT_SELECTORS {
        let Ok(element) = page.find_element(*selector).await else {
            continue;
        };
        match element.click().await {
            Ok(_) => {
                humanize::random_delay(500, 1000).await;
                return;
            }
            Err(e) => warn!("warmer: consent click failed on {}: {}", selector, e),
        }
    }
}

/// Hover over a category link to look like idle browsing. Best-effort.
async fn browse_around(page: &Page) {
    let Ok(links) = page.find_elements("a[href*='/browse/']").await else {
        return;
    };
    if links.is_empty() {
        return;
    }
    let pick = {
        let mut rng = rand::rng();
        rng.random_range(0..links.len().min(3))
    };
    if let Ok(point) = links[pick].clickable_point().await {
        let target = humanize::Point::new(point.x, point.y);
        if let Err(e) = humanize::mouse_move(page, target, 20, true).await {
            warn!("warmer: browse hover failed: {}", e);
        }
        humanize::random_delay(500, 1000).await;
    }
}
