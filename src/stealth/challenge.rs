//! Press-and-hold challenge solver.
//!
//! State machine: `Idle → Detected → Fumbling → Holding → Verifying →
//! Resolved(success|failure)`. The sequence is deliberately slow: a
//! hesitant first contact, a long held press with micro-jitter, then a
//! patient wait for server-side evaluation. `solve()` never errors: any
//! page death mid-sequence collapses straight to `Resolved(failure)` and
//! the caller must treat `false` as session-fatal.

use aho_corasick::AhoCorasick;
use chromiumoxide::Page;
use rand::distr::{Distribution, Uniform};
use rand::Rng;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::humanize::{self, Point};

/// Content signatures of known interactive verification gates.
const CHALLENGE_MARKERS: &[&str] = &[
    "px-captcha",
    "press & hold",
    "press and hold",
    "challenges.cloudflare.com",
    "hcaptcha.com",
    "recaptcha",
];

static MARKER_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn marker_matcher() -> &'static AhoCorasick {
    MARKER_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(CHALLENGE_MARKERS)
            .expect("valid challenge markers")
    })
}

/// Does the rendered content carry a known challenge signature?
pub fn detect(html: &str) -> bool {
    marker_matcher().is_match(html)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Idle,
    Detected,
    Fumbling,
    Holding,
    Verifying,
    Resolved(bool),
}

/// `solve()` is only legal before the sequence has started.
pub fn can_start(state: ChallengeState) -> bool {
    matches!(state, ChallengeState::Idle | ChallengeState::Detected)
}

pub struct ChallengeSolver {
    state: ChallengeState,
}

impl Default for ChallengeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeSolver {
    pub fn new() -> Self {
        Self {
            state: ChallengeState::Idle,
        }
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// Record that a challenge was observed before solving starts.
    pub fn mark_detected(&mut self) {
        if self.state == ChallengeState::Idle {
            self.state = ChallengeState::Detected;
        }
    }

    fn fail(&mut self, context: &str) -> bool {
        warn!("challenge: aborting to Resolved(failure): {}", context);
        self.state = ChallengeState::Resolved(false);
        false
    }

    /// Attempt to clear a press-and-hold gate centered on `target`.
    ///
    /// Once started the sequence runs to a terminal state; there is no
    /// mid-flight cancellation at this layer. Returns `true` only when the
    /// post-release re-detection comes back clean.
    pub async fn solve(&mut self, page: &Page, target: Point) -> bool {
        if !can_start(self.state) {
            warn!("challenge: solve() called from {:?}, refusing", self.state);
            return false;
        }

        // ── Fumbling: hesitant first contact ────────────────────────────────
        self.state = ChallengeState::Fumbling;
        info!("challenge: approaching target ({:.0}, {:.0})", target.x, target.y);
        if humanize::mouse_move(page, target, 25, true).await.is_err() {
            return self.fail("pointer approach failed");
        }

        let fumbles = {
            let mut rng = rand::rng();
            rng.random_range(2u32..=3)
        };
        for attempt in 0..fumbles {
            let point = jittered(target, 4.0);
            if humanize::mouse_down(page, point).await.is_err() {
                return self.fail("press failed mid-fumble");
            }
            humanize::random_delay(500, 1500).await; // short hold
            if humanize::mouse_up(page, point).await.is_err() {
                return self.fail("release failed mid-fumble");
            }
            info!("challenge: fumble {}/{}", attempt + 1, fumbles);
            humanize::random_delay(300, 800).await; // gap before next try
        }

        // ── Holding: the real press ─────────────────────────────────────────
        self.state = ChallengeState::Holding;
        if humanize::mouse_down(page, target).await.is_err() {
            return self.fail("final press failed");
        }

        let hold = {
            let mut rng = rand::rng();
            Duration::from_millis(rng.random_range(10_000u64..=13_000))
        };
        info!("challenge: holding for {:.1}s", hold.as_secs_f64());

        // Continuous micro-jitter while held; a perfectly static pointer
        // over the widget is itself a detection signal.
        let started = Instant::now();
        while started.elapsed() < hold {
            let pause = {
                let mut rng = rand::rng();
                let dist = Uniform::new(100u64, 300).unwrap();
                dist.sample(&mut rng)
            };
            tokio::time::sleep(Duration::from_millis(pause)).await;
            let wiggle = jittered(target, 1.5);
            if humanize::dispatch_mouse(
                page,
                chromiumoxide::cdp::browser_protocol::input::DispatchMouseEventType::MouseMoved,
                wiggle,
                None,
            )
            .await
            .is_err()
            {
                return self.fail("page died mid-hold");
            }
        }

        if humanize::mouse_up(page, target).await.is_err() {
            return self.fail("release failed after hold");
        }

        // ── Verifying: wait out server-side evaluation ──────────────────────
        self.state = ChallengeState::Verifying;
        info!("challenge: released, waiting for verification");
        humanize::random_delay(3000, 7000).await;

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => return self.fail(&format!("content fetch failed after release: {}", e)),
        };

        let cleared = !detect(&html);
        self.state = ChallengeState::Resolved(cleared);
        if cleared {
            info!("challenge: cleared");
        } else {
            warn!("challenge: still present after hold, giving up");
        }
        cleared
    }
}

fn jittered(point: Point, radius: f64) -> Point {
    let mut rng = rand::rng();
    Point {
        x: point.x + rng.random_range(-radius..radius),
        y: point.y + rng.random_range(-radius..radius),
    }
}
