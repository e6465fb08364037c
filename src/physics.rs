//! Fling deceleration and zoom animation curves.
//!
//! The fling model is a fixed-friction spline: the initial speed maps to a
//! total duration and distance through a logarithmic deceleration law, and
//! the position over time follows a precomputed, normalized spline curve.
//! Faster releases travel farther and for longer; nothing oscillates.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use log::trace;

const GRAVITY_EARTH: f64 = 9.80665;
/// Inches per meter.
const INCHES_PER_METER: f64 = 39.37;
/// Tuning factor applied on top of the physical deceleration.
const PHYSICAL_FRICTION: f64 = 0.31;

const INFLEXION: f64 = 0.35;
const START_TENSION: f64 = 0.5;
const END_TENSION: f64 = 1.0;
const P1: f64 = START_TENSION * INFLEXION;
const P2: f64 = 1.0 - END_TENSION * (1.0 - INFLEXION);

const NB_SAMPLES: usize = 100;

fn deceleration_rate() -> f64 {
    0.78f64.ln() / 0.9f64.ln()
}

/// Normalized distance travelled at normalized time `i / NB_SAMPLES`.
static SPLINE_POSITION: LazyLock<[f64; NB_SAMPLES + 1]> = LazyLock::new(|| {
    let mut table = [0.0; NB_SAMPLES + 1];
    let mut x_min = 0.0f64;
    for (i, slot) in table.iter_mut().enumerate().take(NB_SAMPLES) {
        let alpha = i as f64 / NB_SAMPLES as f64;
        let mut x_max = 1.0f64;
        // Bisect the time-parameterized Bezier for x(t) = alpha.
        let (x, coef) = loop {
            let x = x_min + (x_max - x_min) / 2.0;
            let coef = 3.0 * x * (1.0 - x);
            let tx = coef * ((1.0 - x) * P1 + x * P2) + x * x * x;
            if (tx - alpha).abs() < 1e-5 {
                break (x, coef);
            }
            if tx > alpha {
                x_max = x;
            } else {
                x_min = x;
            }
        };
        *slot = coef * ((1.0 - x) * START_TENSION + x) + x * x * x;
    }
    table[NB_SAMPLES] = 1.0;
    table
});

/// Friction parameters of the fling model.
#[derive(Debug, Clone, Copy)]
pub struct FlingModel {
    friction: f64,
    physical_coeff: f64,
}

impl FlingModel {
    /// `friction` is the unitless scroll friction; `ppi` the display density.
    pub fn new(friction: f32, ppi: f32) -> Self {
        Self {
            friction: f64::from(friction.max(f32::EPSILON)),
            physical_coeff: GRAVITY_EARTH * INCHES_PER_METER * f64::from(ppi) * PHYSICAL_FRICTION,
        }
    }

    fn spline_deceleration(&self, speed: f64) -> f64 {
        (INFLEXION * speed / (self.friction * self.physical_coeff)).ln()
    }

    /// Total flight time for an initial `speed` (px/s, sign ignored).
    pub fn duration(&self, speed: f32) -> Duration {
        let speed = f64::from(speed.abs());
        if speed == 0.0 {
            return Duration::ZERO;
        }
        let l = self.spline_deceleration(speed);
        let ms = 1000.0 * (l / (deceleration_rate() - 1.0)).exp();
        Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::ZERO)
    }

    /// Total travel distance for an initial `speed` (px/s, sign ignored).
    pub fn distance(&self, speed: f32) -> f32 {
        let speed = f64::from(speed.abs());
        if speed == 0.0 {
            return 0.0;
        }
        let l = self.spline_deceleration(speed);
        let decel = deceleration_rate();
        (self.friction * self.physical_coeff * (decel / (decel - 1.0) * l).exp()) as f32
    }
}

/// Inclusive bounds for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f32,
    pub max: f32,
}

impl AxisBounds {
    pub const UNBOUNDED: Self = Self {
        min: f32::NEG_INFINITY,
        max: f32::INFINITY,
    };

    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.min, self.max)
    }
}

/// One sampled frame of a running fling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlingFrame {
    pub x: f32,
    pub y: f32,
    /// Instantaneous speed along the fling direction (px/s).
    pub velocity: f32,
    pub finished: bool,
}

/// A two-axis fling in flight. Each axis is pinned to its own bounds.
#[derive(Debug, Clone)]
pub struct Fling {
    start: Instant,
    duration: Duration,
    start_x: f32,
    start_y: f32,
    final_x: f32,
    final_y: f32,
    distance: f32,
    bounds_x: AxisBounds,
    bounds_y: AxisBounds,
}

impl Fling {
    pub fn start(
        model: &FlingModel,
        now: Instant,
        (start_x, start_y): (f32, f32),
        (vx, vy): (f32, f32),
        bounds_x: AxisBounds,
        bounds_y: AxisBounds,
    ) -> Self {
        let speed = vx.hypot(vy);
        let duration = model.duration(speed);
        let distance = model.distance(speed);
        let (cx, cy) = if speed == 0.0 {
            (1.0, 1.0)
        } else {
            (vx / speed, vy / speed)
        };
        let final_x = bounds_x.clamp(start_x + (distance * cx).round());
        let final_y = bounds_y.clamp(start_y + (distance * cy).round());
        trace!(
            "fling: v=({vx:.0},{vy:.0}) speed={speed:.0} duration={}ms distance={distance:.1} final=({final_x},{final_y})",
            duration.as_millis()
        );
        Self {
            start: now,
            duration,
            start_x,
            start_y,
            final_x,
            final_y,
            distance,
            bounds_x,
            bounds_y,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn final_position(&self) -> (f32, f32) {
        (self.final_x, self.final_y)
    }

    /// Position at `now`. Finishes when the duration has elapsed or both
    /// axes have reached their (pinned) final positions.
    pub fn sample(&self, now: Instant) -> FlingFrame {
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration || self.duration.is_zero() {
            return FlingFrame {
                x: self.final_x,
                y: self.final_y,
                velocity: 0.0,
                finished: true,
            };
        }

        let t = (elapsed.as_secs_f64() / self.duration.as_secs_f64()) as f32;
        let index = ((NB_SAMPLES as f32 * t) as usize).min(NB_SAMPLES);
        let (distance_coef, velocity_coef) = if index < NB_SAMPLES {
            let t_inf = index as f32 / NB_SAMPLES as f32;
            let t_sup = (index + 1) as f32 / NB_SAMPLES as f32;
            let d_inf = SPLINE_POSITION[index] as f32;
            let d_sup = SPLINE_POSITION[index + 1] as f32;
            let v = (d_sup - d_inf) / (t_sup - t_inf);
            (d_inf + (t - t_inf) * v, v)
        } else {
            (1.0, 0.0)
        };

        let velocity = velocity_coef * self.distance / self.duration.as_secs_f32();
        let x = self
            .bounds_x
            .clamp(self.start_x + (distance_coef * (self.final_x - self.start_x)).round());
        let y = self
            .bounds_y
            .clamp(self.start_y + (distance_coef * (self.final_y - self.start_y)).round());
        FlingFrame {
            x,
            y,
            velocity,
            finished: x == self.final_x && y == self.final_y,
        }
    }
}

/// Decelerating ease-out: `1 - (1 - t)^2`.
pub fn decelerate(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

/// Time-based animation of scale and translation toward a target.
#[derive(Debug, Clone)]
pub struct ZoomAnimation {
    start: Instant,
    duration: Duration,
    from_scale: f32,
    to_scale: f32,
    from: (f32, f32),
    to: (f32, f32),
}

/// One frame of a zoom animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomFrame {
    pub scale: f32,
    pub x: f32,
    pub y: f32,
    pub finished: bool,
}

impl ZoomAnimation {
    pub fn new(
        now: Instant,
        duration: Duration,
        (from_scale, to_scale): (f32, f32),
        from: (f32, f32),
        to: (f32, f32),
    ) -> Self {
        Self {
            start: now,
            duration,
            from_scale,
            to_scale,
            from,
            to,
        }
    }

    pub fn sample(&self, now: Instant) -> ZoomFrame {
        let elapsed = now.saturating_duration_since(self.start);
        if self.duration.is_zero() || elapsed >= self.duration {
            return ZoomFrame {
                scale: self.to_scale,
                x: self.to.0,
                y: self.to.1,
                finished: true,
            };
        }
        let f = decelerate((elapsed.as_secs_f64() / self.duration.as_secs_f64()) as f32);
        let lerp = |a: f32, b: f32| a + (b - a) * f;
        ZoomFrame {
            scale: lerp(self.from_scale, self.to_scale),
            x: lerp(self.from.0, self.to.0),
            y: lerp(self.from.1, self.to.1),
            finished: false,
        }
    }
}

/// Estimates release velocity from recent pointer samples.
///
/// Keeps samples from the last `HORIZON` and reports the average velocity
/// between the oldest and newest of them.
#[derive(Debug, Default, Clone)]
pub struct VelocityTracker {
    samples: Vec<(Instant, f32, f32)>,
}

impl VelocityTracker {
    const HORIZON: Duration = Duration::from_millis(100);

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn add(&mut self, now: Instant, x: f32, y: f32) {
        self.samples.push((now, x, y));
        self.samples
            .retain(|(t, _, _)| now.saturating_duration_since(*t) <= Self::HORIZON);
    }

    /// Velocity in px/s, clamped to `±max` per axis.
    pub fn velocity(&self, max: f32) -> (f32, f32) {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return (0.0, 0.0);
        };
        let dt = last.0.saturating_duration_since(first.0).as_secs_f32();
        if dt <= 0.0 {
            return (0.0, 0.0);
        }
        let max = max.abs();
        let vx = ((last.1 - first.1) / dt).clamp(-max, max);
        let vy = ((last.2 - first.2) / dt).clamp(-max, max);
        (vx, vy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> FlingModel {
        FlingModel::new(0.015, 160.0)
    }

    #[test]
    fn spline_table_is_monotonic_from_zero_to_one() {
        assert_eq!(SPLINE_POSITION[0], 0.0);
        assert_eq!(SPLINE_POSITION[NB_SAMPLES], 1.0);
        for w in SPLINE_POSITION.windows(2) {
            assert!(w[1] >= w[0], "{} then {}", w[0], w[1]);
        }
    }

    #[test]
    fn faster_release_goes_farther_and_longer() {
        let m = model();
        let speeds = [200.0, 800.0, 2000.0, 6000.0];
        for pair in speeds.windows(2) {
            assert!(m.distance(pair[1]) > m.distance(pair[0]));
            assert!(m.duration(pair[1]) > m.duration(pair[0]));
        }
        assert_eq!(m.distance(-2000.0), m.distance(2000.0));
    }

    #[test]
    fn zero_velocity_is_an_immediate_stop() {
        let m = model();
        let now = Instant::now();
        let fling = Fling::start(&m, now, (10.0, 20.0), (0.0, 0.0), AxisBounds::UNBOUNDED, AxisBounds::UNBOUNDED);
        assert_eq!(fling.duration(), Duration::ZERO);
        let f = fling.sample(now);
        assert!(f.finished);
        assert_eq!((f.x, f.y), (10.0, 20.0));
    }

    #[test]
    fn fling_moves_along_velocity_and_settles() {
        let m = model();
        let now = Instant::now();
        let fling = Fling::start(&m, now, (0.0, 0.0), (0.0, -3000.0), AxisBounds::UNBOUNDED, AxisBounds::UNBOUNDED);
        let (fx, fy) = fling.final_position();
        assert_eq!(fx, 0.0);
        assert!(fy < 0.0);

        let mut prev = 0.0f32;
        let steps = 20;
        for i in 1..=steps {
            let at = now + fling.duration().mul_f32(i as f32 / steps as f32);
            let f = fling.sample(at);
            assert!(f.y <= prev, "fling reversed at step {i}");
            prev = f.y;
        }
        let end = fling.sample(now + fling.duration());
        assert!(end.finished);
        assert_eq!(end.y, fy);
    }

    #[test]
    fn fling_pins_each_axis_to_its_bounds() {
        let m = model();
        let now = Instant::now();
        let fling = Fling::start(
            &m,
            now,
            (0.0, 0.0),
            (5000.0, 5000.0),
            AxisBounds::new(-50.0, 50.0),
            AxisBounds::new(0.0, 10_000.0),
        );
        let (fx, fy) = fling.final_position();
        assert_eq!(fx, 50.0);
        assert!(fy > 50.0);
        let mid = fling.sample(now + fling.duration() / 2);
        assert!(mid.x <= 50.0);
    }

    #[test]
    fn decelerate_curve_endpoints() {
        assert_eq!(decelerate(0.0), 0.0);
        assert_eq!(decelerate(1.0), 1.0);
        assert!(decelerate(0.5) > 0.5);
    }

    #[test]
    fn zoom_animation_reaches_target() {
        let now = Instant::now();
        let anim = ZoomAnimation::new(now, Duration::from_millis(200), (1.0, 2.0), (0.0, 0.0), (40.0, -20.0));
        let mid = anim.sample(now + Duration::from_millis(100));
        assert!(!mid.finished);
        assert!(mid.scale > 1.5 && mid.scale < 2.0);
        let end = anim.sample(now + Duration::from_millis(250));
        assert!(end.finished);
        assert_eq!((end.scale, end.x, end.y), (2.0, 40.0, -20.0));
    }

    #[test]
    fn velocity_tracker_uses_recent_samples() {
        let t0 = Instant::now();
        let mut vt = VelocityTracker::default();
        vt.add(t0, 0.0, 0.0);
        vt.add(t0 + Duration::from_millis(500), 0.0, 0.0);
        vt.add(t0 + Duration::from_millis(550), 0.0, 50.0);
        vt.add(t0 + Duration::from_millis(600), 0.0, 100.0);
        let (vx, vy) = vt.velocity(8000.0);
        assert_eq!(vx, 0.0);
        assert!((vy - 1000.0).abs() < 1.0, "vy={vy}");
        assert_eq!(vt.velocity(300.0).1, 300.0);
    }
}
