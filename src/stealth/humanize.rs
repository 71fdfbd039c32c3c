//! Pointer trajectories and scroll sequences that read as human.
//!
//! The planning functions are pure (and unit-tested); the async drivers
//! apply a plan to a live CDP page via `Input.dispatchMouseEvent` /
//! `window.scrollBy`.

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::Page;
use rand::distr::{Distribution, Uniform};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Randomized trajectory origin: x ∈ [100, 500), y ∈ [100, 400).
/// Mimics a cursor idling somewhere in the upper-left content area.
fn random_start() -> Point {
    let mut rng = rand::rng();
    Point {
        x: rng.random_range(100.0..500.0),
        y: rng.random_range(100.0..400.0),
    }
}

/// Cubic Bezier pointer path from a randomized start to `target`.
///
/// Control points sit 30% and 70% along the start→target vector, each
/// displaced by a random offset of up to ±100 units per axis, so no two
/// approaches take the same arc. Returns exactly `steps + 1` points; the
/// first is the randomized start and the last is the literal target.
/// Jitter is applied only to interior points so the pointer genuinely
/// lands where the caller asked.
pub fn trajectory(target: Point, steps: usize, jitter: bool) -> Vec<Point> {
    let steps = steps.max(1);
    let mut rng = rand::rng();
    let start = random_start();

    let offset = Uniform::new(-100.0f64, 100.0).unwrap();
    let cp1 = Point {
        x: start.x + (target.x - start.x) * 0.3 + offset.sample(&mut rng),
        y: start.y + (target.y - start.y) * 0.3 + offset.sample(&mut rng),
    };
    let cp2 = Point {
        x: start.x + (target.x - start.x) * 0.7 + offset.sample(&mut rng),
        y: start.y + (target.y - start.y) * 0.7 + offset.sample(&mut rng),
    };

    let mut points = Vec::with_capacity(steps + 1);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let u = 1.0 - t;

        // Standard cubic Bezier: u³·P0 + 3u²t·P1 + 3ut²·P2 + t³·P3
        let mut x = u.powi(3) * start.x
            + 3.0 * u.powi(2) * t * cp1.x
            + 3.0 * u * t.powi(2) * cp2.x
            + t.powi(3) * target.x;
        let mut y = u.powi(3) * start.y
            + 3.0 * u.powi(2) * t * cp1.y
            + 3.0 * u * t.powi(2) * cp2.y
            + t.powi(3) * target.y;

        if jitter && i > 0 && i < steps {
            x += rng.random_range(-1.0..1.0);
            y += rng.random_range(-1.0..1.0);
        }

        points.push(Point { x, y });
    }
    points
}

/// Sine-shaped per-step pacing: 5ms at the endpoints, peaking at 20ms
/// mid-curve. Models acceleration out of rest and deceleration onto the
/// target.
pub fn step_delay(step: usize, steps: usize) -> Duration {
    let t = step as f64 / steps.max(1) as f64;
    let ms = 5.0 + (t * std::f64::consts::PI).sin() * 15.0;
    Duration::from_micros((ms * 1000.0) as u64)
}

/// Plan a smooth scroll: 10–19 randomly-sized steps with ±20% variance
/// each, paired with a 30–100ms pause. Non-smooth is a single jump.
pub fn scroll_plan(distance: f64, smooth: bool) -> Vec<(f64, u64)> {
    if !smooth {
        return vec![(distance, 0)];
    }
    let mut rng = rand::rng();
    let steps = rng.random_range(10usize..20);
    let step = distance / steps as f64;
    (0..steps)
        .map(|_| {
            (
                step * rng.random_range(0.8..1.2),
                rng.random_range(30u64..100),
            )
        })
        .collect()
}

/// Sleep a uniformly random interval. Used for settle delays and
/// inter-item pacing everywhere randomized timing is called for.
pub async fn random_delay(min_ms: u64, max_ms: u64) {
    let ms = {
        let mut rng = rand::rng();
        rng.random_range(min_ms..=max_ms)
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ── CDP drivers ──────────────────────────────────────────────────────────────

pub(crate) async fn dispatch_mouse(
    page: &Page,
    kind: DispatchMouseEventType,
    point: Point,
    button: Option<MouseButton>,
) -> Result<()> {
    let mut builder = DispatchMouseEventParams::builder()
        .r#type(kind)
        .x(point.x)
        .y(point.y);
    if let Some(button) = button {
        builder = builder.button(button).click_count(1);
    }
    let params = builder
        .build()
        .map_err(|e| anyhow!("mouse event build failed: {}", e))?;
    page.execute(params).await?;
    Ok(())
}

/// Move the pointer to `target` along a humanized Bezier path.
pub async fn mouse_move(page: &Page, target: Point, steps: usize, jitter: bool) -> Result<()> {
    for (i, point) in trajectory(target, steps, jitter).into_iter().enumerate() {
        dispatch_mouse(page, DispatchMouseEventType::MouseMoved, point, None).await?;
        tokio::time::sleep(step_delay(i, steps)).await;
    }
    Ok(())
}

pub async fn mouse_down(page: &Page, point: Point) -> Result<()> {
    dispatch_mouse(
        page,
        DispatchMouseEventType::MousePressed,
        point,
        Some(MouseButton::Left),
    )
    .await
}

pub async fn mouse_up(page: &Page, point: Point) -> Result<()> {
    dispatch_mouse(
        page,
        DispatchMouseEventType::MouseReleased,
        point,
        Some(MouseButton::Left),
    )
    .await
}

/// Scroll the page by `distance` px, optionally split into humanized steps.
pub async fn scroll(page: &Page, distance: f64, smooth: bool) -> Result<()> {
    for (px, pause_ms) in scroll_plan(distance, smooth) {
        page.evaluate(format!("window.scrollBy(0, {:.0});", px))
            .await?;
        if pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(pause_ms)).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_has_steps_plus_one_points() {
        for steps in [5usize, 25, 60] {
            let points = trajectory(Point::new(800.0, 600.0), steps, true);
            assert_eq!(points.len(), steps + 1);
        }
    }

    #[test]
    fn test_trajectory_ends_exactly_on_target() {
        let target = Point::new(640.0, 480.0);
        for _ in 0..20 {
            let points = trajectory(target, 25, true);
            let last = points.last().unwrap();
            assert_eq!(last.x, target.x);
            assert_eq!(last.y, target.y);
        }
    }

    #[test]
    fn test_trajectory_starts_in_randomized_region() {
        let target = Point::new(900.0, 700.0);
        for _ in 0..20 {
            let points = trajectory(target, 25, true);
            let first = points.first().unwrap();
            assert!(first.x >= 100.0 && first.x < 500.0, "start x: {}", first.x);
            assert!(first.y >= 100.0 && first.y < 400.0, "start y: {}", first.y);
            assert_ne!((first.x, first.y), (target.x, target.y));
        }
    }

    #[test]
    fn test_trajectory_zero_steps_is_a_single_move() {
        let target = Point::new(300.0, 200.0);
        let points = trajectory(target, 0, true);
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
        let last = points.last().unwrap();
        assert_eq!((last.x, last.y), (target.x, target.y));
    }

    #[test]
    fn test_step_delay_peaks_at_midpoint() {
        let start = step_delay(0, 25);
        let mid = step_delay(12, 25);
        let end = step_delay(25, 25);
        assert!(mid > start);
        assert!(mid > end);
        assert!(mid <= Duration::from_millis(20));
        assert!(start >= Duration::from_millis(5));
    }

    #[test]
    fn test_scroll_plan_smooth_shape() {
        for _ in 0..20 {
            let plan = scroll_plan(500.0, true);
            assert!(
                (10..20).contains(&plan.len()),
                "step count: {}",
                plan.len()
            );
            let total: f64 = plan.iter().map(|(px, _)| px).sum();
            // Each step varies ±20%, so the total stays inside the same band.
            assert!(total > 500.0 * 0.8 && total < 500.0 * 1.2, "total: {total}");
            for (_, pause) in &plan {
                assert!((30..100).contains(pause));
            }
        }
    }

    #[test]
    fn test_scroll_plan_immediate_jump() {
        let plan = scroll_plan(750.0, false);
        assert_eq!(plan, vec![(750.0, 0)]);
    }
}
