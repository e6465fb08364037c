//! Zoom / pan / fling engine.
//!
//! An explicit state machine over `Phase::{Idle, Dragging, Flinging}`.
//! Pointer events and animation ticks go in; `Effect`s come out. Zoom is a
//! parallel state (scale plus translation) that modulates dragging but is
//! not a phase of its own.
//!
//! All coordinates are screen pixels relative to the viewport's top-left
//! corner. The zoom transform scales about the viewport center and then
//! translates, so `|x| <= half_w * (scale - 1)` keeps the content covering
//! the viewport. The container offset is in unscaled content pixels.

use std::time::Instant;

use log::{debug, trace};

use crate::config::GestureConfig;
use crate::physics::{AxisBounds, Fling, FlingModel, VelocityTracker, ZoomAnimation};
use crate::window::ScrollDirection;

/// Pinch may overshoot `min_scale` by this factor while fingers are down.
pub const PINCH_FLOOR: f32 = 0.75;

const SCALE_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dragging,
    Flinging,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up { x: f32, y: f32 },
    Cancel,
    /// Two fingers down; `span` is the distance between them.
    PinchBegin { focus_x: f32, focus_y: f32, span: f32 },
    Pinch { focus_x: f32, focus_y: f32, span: f32 },
    PinchEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Move the page-scroll container to this absolute offset.
    ScrollTo(f32),
    /// The zoom transform changed.
    TransformChanged { scale: f32, x: f32, y: f32 },
    /// Single tap, confirmed after the double-tap timeout.
    Tap { x: f32, y: f32 },
    LongPress { x: f32, y: f32 },
}

/// Scale, translation and container offset. Written only by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollState {
    pub scale: f32,
    pub x: f32,
    pub y: f32,
    pub offset: f32,
    pub direction: ScrollDirection,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            x: 0.0,
            y: 0.0,
            offset: 0.0,
            direction: ScrollDirection::Forward,
        }
    }
}

/// What the engine needs to know about the scroll container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerState {
    pub offset: f32,
    pub max_offset: f32,
    /// The center panel is the first panel.
    pub at_first: bool,
    /// The center panel is the last panel.
    pub at_last: bool,
}

#[derive(Debug, Clone, Copy)]
struct Touch {
    down_at: Instant,
    down: (f32, f32),
    last: (f32, f32),
    panning: bool,
    long_pressed: bool,
    /// Second down of a double tap.
    second_tap: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingTap {
    at: Instant,
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerticalTarget {
    Translation,
    Container,
}

#[derive(Debug, Clone)]
struct ActiveFling {
    fling: Fling,
    vertical: VerticalTarget,
}

pub struct GestureEngine {
    config: GestureConfig,
    model: FlingModel,
    phase: Phase,
    state: ScrollState,
    container: ContainerState,
    viewport: (f32, f32),
    tracker: VelocityTracker,
    touch: Option<Touch>,
    pending_tap: Option<PendingTap>,
    pinch_span: Option<f32>,
    fling: Option<ActiveFling>,
    zoom: Option<ZoomAnimation>,
}

impl GestureEngine {
    pub fn new(config: GestureConfig, viewport_w: f32, viewport_h: f32) -> Self {
        let model = FlingModel::new(config.fling_friction, config.ppi);
        Self {
            config,
            model,
            phase: Phase::Idle,
            state: ScrollState::default(),
            container: ContainerState::default(),
            viewport: (viewport_w, viewport_h),
            tracker: VelocityTracker::default(),
            touch: None,
            pending_tap: None,
            pinch_span: None,
            fling: None,
            zoom: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    /// True while a fling or zoom animation still needs ticks.
    pub fn is_animating(&self) -> bool {
        self.fling.is_some() || self.zoom.is_some() || self.pending_tap.is_some()
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width, height);
        self.clamp_translation();
    }

    /// Sync container bounds and edge flags from the session.
    pub fn set_container(&mut self, container: ContainerState) {
        self.container = container;
        self.state.offset = container.offset.clamp(0.0, container.max_offset.max(0.0));
    }

    /// Programmatic scroll (jump, restore). Stops any fling.
    pub fn scroll_to(&mut self, offset: f32) -> Vec<Effect> {
        self.stop_fling();
        let mut fx = Vec::new();
        self.scroll_container_to(offset, &mut fx);
        fx
    }

    pub fn handle(&mut self, event: GestureEvent, now: Instant) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.expire_pending_tap(now, &mut fx);
        match event {
            GestureEvent::Down { x, y } => self.on_down(x, y, now),
            GestureEvent::Move { x, y } => self.on_move(x, y, now, &mut fx),
            GestureEvent::Up { x, y } => self.on_up(x, y, now, &mut fx),
            GestureEvent::Cancel => {
                debug!("gesture: cancel ({:?} -> Idle)", self.phase);
                self.touch = None;
                self.pinch_span = None;
                self.tracker.clear();
                self.stop_fling();
            }
            GestureEvent::PinchBegin { span, .. } => {
                debug!("gesture: pinch begin span={span:.1} scale={:.3}", self.state.scale);
                self.stop_fling();
                self.zoom = None;
                self.pending_tap = None;
                self.pinch_span = Some(span);
                if let Some(t) = &mut self.touch {
                    // a pinch is never a tap or a pan start
                    t.panning = true;
                    t.long_pressed = true;
                }
            }
            GestureEvent::Pinch {
                focus_x,
                focus_y,
                span,
            } => self.on_pinch(focus_x, focus_y, span, &mut fx),
            GestureEvent::PinchEnd => self.on_pinch_end(now),
        }
        fx
    }

    /// Advance animations, confirm taps and long presses.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.expire_pending_tap(now, &mut fx);

        if let Some(t) = &mut self.touch
            && !t.panning
            && !t.long_pressed
            && self.pinch_span.is_none()
            && now.saturating_duration_since(t.down_at) >= self.config.long_press_timeout
        {
            t.long_pressed = true;
            debug!("gesture: long press at ({:.0},{:.0})", t.down.0, t.down.1);
            fx.push(Effect::LongPress {
                x: t.down.0,
                y: t.down.1,
            });
        }

        if let Some(anim) = &self.zoom {
            let frame = anim.sample(now);
            self.state.scale = frame.scale;
            self.state.x = frame.x;
            self.state.y = frame.y;
            self.clamp_translation();
            self.push_transform(&mut fx);
            if frame.finished {
                debug!("gesture: zoom animation done, scale={:.3}", self.state.scale);
                self.zoom = None;
            }
        }

        if let Some(active) = &self.fling {
            let frame = active.fling.sample(now);
            let vertical = active.vertical;
            trace!(
                "gesture: fling frame ({:.1},{:.1}) v={:.0}",
                frame.x,
                frame.y,
                frame.velocity
            );
            let mut changed = frame.x != self.state.x;
            self.state.x = frame.x;
            match vertical {
                VerticalTarget::Translation => {
                    changed |= frame.y != self.state.y;
                    self.state.y = frame.y;
                }
                VerticalTarget::Container => self.scroll_container_to(frame.y, &mut fx),
            }
            if changed {
                self.push_transform(&mut fx);
            }
            if frame.finished {
                debug!("gesture: fling finished (Flinging -> Idle)");
                self.fling = None;
                self.phase = Phase::Idle;
            }
        }
        fx
    }

    // -----------------------------------------------------------------------
    // Pointer handling
    // -----------------------------------------------------------------------

    fn on_down(&mut self, x: f32, y: f32, now: Instant) {
        if self.phase == Phase::Flinging {
            debug!("gesture: down cancels fling (Flinging -> Dragging)");
        }
        self.stop_fling();

        let slop = self.config.touch_slop * 4.0;
        let second_tap = self.pending_tap.take().is_some_and(|p| {
            now.saturating_duration_since(p.at) < self.config.double_tap_timeout
                && (p.x - x).hypot(p.y - y) <= slop
        });

        self.tracker.clear();
        self.tracker.add(now, x, y);
        self.touch = Some(Touch {
            down_at: now,
            down: (x, y),
            last: (x, y),
            panning: false,
            long_pressed: false,
            second_tap,
        });
        self.phase = Phase::Dragging;
        trace!("gesture: down ({x:.0},{y:.0}) second_tap={second_tap}");
    }

    fn on_move(&mut self, x: f32, y: f32, now: Instant, fx: &mut Vec<Effect>) {
        let Some(mut t) = self.touch else { return };
        if self.pinch_span.is_some() {
            t.last = (x, y);
            self.touch = Some(t);
            return;
        }
        self.tracker.add(now, x, y);
        if !t.panning {
            let slop = self.config.touch_slop / self.state.scale.max(SCALE_EPSILON);
            if (x - t.down.0).hypot(y - t.down.1) < slop {
                return;
            }
            t.panning = true;
            debug!("gesture: pan start (slop {slop:.1}px at scale {:.3})", self.state.scale);
        }
        let (dx, dy) = (x - t.last.0, y - t.last.1);
        t.last = (x, y);
        self.touch = Some(t);
        self.pan(dx, dy, fx);
    }

    fn on_up(&mut self, x: f32, y: f32, now: Instant, fx: &mut Vec<Effect>) {
        let Some(t) = self.touch.take() else { return };
        self.tracker.add(now, x, y);
        let pinching = self.pinch_span.is_some();

        if !t.panning && !t.long_pressed && !pinching {
            self.phase = Phase::Idle;
            if t.second_tap {
                self.start_double_tap_zoom(t.down.0, t.down.1, now);
            } else {
                self.pending_tap = Some(PendingTap { at: now, x, y });
            }
            return;
        }
        if pinching || !t.panning {
            self.phase = Phase::Idle;
            return;
        }

        // Flush the last segment before deciding on a fling.
        let (dx, dy) = (x - t.last.0, y - t.last.1);
        if dx != 0.0 || dy != 0.0 {
            self.pan(dx, dy, fx);
        }

        let (vx, vy) = self.tracker.velocity(self.config.max_fling_velocity);
        let speed = vx.hypot(vy);
        if speed < self.config.min_fling_velocity.max(f32::MIN_POSITIVE) {
            debug!("gesture: release speed {speed:.0}px/s below threshold (Dragging -> Idle)");
            self.phase = Phase::Idle;
            return;
        }
        self.start_fling(vx, vy, now);
    }

    /// Apply a finger delta: horizontal to the zoom translation, vertical to
    /// the zoom translation at the scroll extremes and to the container
    /// otherwise.
    fn pan(&mut self, dx: f32, dy: f32, fx: &mut Vec<Effect>) {
        let (bx, by) = self.translation_bounds();
        let mut changed = false;

        let nx = bx.clamp(self.state.x + dx);
        if nx != self.state.x {
            self.state.x = nx;
            changed = true;
        }

        let mut rest = dy;
        if self.vertical_free() {
            let ny = by.clamp(self.state.y + dy);
            rest = dy - (ny - self.state.y);
            if ny != self.state.y {
                self.state.y = ny;
                changed = true;
            }
        }
        if changed {
            self.push_transform(fx);
        }
        if rest != 0.0 {
            let target = self.state.offset - rest / self.state.scale.max(SCALE_EPSILON);
            self.scroll_container_to(target, fx);
        }
    }

    fn start_fling(&mut self, vx: f32, vy: f32, now: Instant) {
        let (bx, by) = self.translation_bounds();
        let scale = self.state.scale.max(SCALE_EPSILON);
        let (vertical, start_y, fling_vy, bounds_y) = if self.vertical_free() {
            (VerticalTarget::Translation, self.state.y, vy, by)
        } else {
            (
                VerticalTarget::Container,
                self.state.offset,
                -vy / scale,
                AxisBounds::new(0.0, self.container.max_offset),
            )
        };
        let fling = Fling::start(
            &self.model,
            now,
            (self.state.x, start_y),
            (vx, fling_vy),
            bx,
            bounds_y,
        );
        debug!(
            "gesture: fling v=({vx:.0},{vy:.0}) target={vertical:?} duration={}ms (Dragging -> Flinging)",
            fling.duration().as_millis()
        );
        self.fling = Some(ActiveFling { fling, vertical });
        self.phase = Phase::Flinging;
    }

    fn stop_fling(&mut self) {
        if self.fling.take().is_some() {
            trace!("gesture: fling stopped");
        }
        if self.touch.is_none() {
            self.phase = Phase::Idle;
        }
    }

    // -----------------------------------------------------------------------
    // Zoom
    // -----------------------------------------------------------------------

    fn on_pinch(&mut self, focus_x: f32, focus_y: f32, span: f32, fx: &mut Vec<Effect>) {
        let Some(last) = self.pinch_span else { return };
        if last <= 0.0 || span <= 0.0 {
            self.pinch_span = Some(span);
            return;
        }
        let old = self.state.scale;
        let new = (old * span / last)
            .max(self.config.min_scale * PINCH_FLOOR)
            .min(self.config.max_scale);
        self.pinch_span = Some(span);
        if new == old {
            return;
        }

        // Keep the content point under the focus where it is.
        let (cx, cy) = (self.viewport.0 / 2.0, self.viewport.1 / 2.0);
        let ratio = new / old;
        self.state.x = (focus_x - cx) - (focus_x - cx - self.state.x) * ratio;
        self.state.y = (focus_y - cy) - (focus_y - cy - self.state.y) * ratio;
        self.state.scale = new;
        if !self.vertical_free() {
            self.state.y = 0.0;
        }
        self.clamp_translation();
        trace!("gesture: pinch scale {old:.3} -> {new:.3}");
        self.push_transform(fx);
    }

    fn on_pinch_end(&mut self, now: Instant) {
        self.pinch_span = None;
        // Finger travel during the pinch must not turn into a fling.
        self.tracker.clear();
        debug!("gesture: pinch end at scale {:.3}", self.state.scale);
        if self.state.scale < self.config.min_scale {
            self.animate_zoom(1.0, (0.0, 0.0), now);
        }
    }

    fn start_double_tap_zoom(&mut self, x: f32, y: f32, now: Instant) {
        if self.state.scale > self.config.min_scale.max(1.0) + SCALE_EPSILON {
            debug!("gesture: double tap zoom out from {:.3}", self.state.scale);
            self.animate_zoom(1.0, (0.0, 0.0), now);
            return;
        }
        let to = self.config.double_tap_scale.min(self.config.max_scale).max(SCALE_EPSILON);
        let (hw, hh) = (self.viewport.0 / 2.0, self.viewport.1 / 2.0);
        let (bx, by) = bounds_for(hw, hh, to);
        let tx = bx.clamp((hw - x) * (to - 1.0));
        let ty = if self.vertical_free_at(to) {
            by.clamp((hh - y) * (to - 1.0))
        } else {
            0.0
        };
        debug!("gesture: double tap zoom in to {to:.2} at ({x:.0},{y:.0})");
        self.animate_zoom(to, (tx, ty), now);
    }

    fn animate_zoom(&mut self, to_scale: f32, to: (f32, f32), now: Instant) {
        self.zoom = Some(ZoomAnimation::new(
            now,
            self.config.zoom_duration,
            (self.state.scale, to_scale),
            (self.state.x, self.state.y),
            to,
        ));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn expire_pending_tap(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        if let Some(p) = self.pending_tap
            && now.saturating_duration_since(p.at) >= self.config.double_tap_timeout
        {
            self.pending_tap = None;
            debug!("gesture: tap at ({:.0},{:.0})", p.x, p.y);
            fx.push(Effect::Tap { x: p.x, y: p.y });
        }
    }

    fn vertical_free(&self) -> bool {
        self.vertical_free_at(self.state.scale)
    }

    fn vertical_free_at(&self, scale: f32) -> bool {
        scale > 1.0 + SCALE_EPSILON && (self.container.at_first || self.container.at_last)
    }

    fn translation_bounds(&self) -> (AxisBounds, AxisBounds) {
        bounds_for(self.viewport.0 / 2.0, self.viewport.1 / 2.0, self.state.scale)
    }

    fn clamp_translation(&mut self) {
        let (bx, by) = self.translation_bounds();
        self.state.x = bx.clamp(self.state.x);
        self.state.y = by.clamp(self.state.y);
    }

    fn scroll_container_to(&mut self, target: f32, fx: &mut Vec<Effect>) {
        let target = target.clamp(0.0, self.container.max_offset.max(0.0));
        let delta = target - self.state.offset;
        if let Some(direction) = ScrollDirection::from_delta(delta) {
            self.state.direction = direction;
            self.state.offset = target;
            self.container.offset = target;
            fx.push(Effect::ScrollTo(target));
        }
    }

    fn push_transform(&self, fx: &mut Vec<Effect>) {
        fx.push(Effect::TransformChanged {
            scale: self.state.scale,
            x: self.state.x,
            y: self.state.y,
        });
    }
}

/// Translation bounds for a viewport of half extents `hw` x `hh` at `scale`;
/// pinned to zero at `scale <= 1`.
fn bounds_for(hw: f32, hh: f32, scale: f32) -> (AxisBounds, AxisBounds) {
    let over = (scale - 1.0).max(0.0);
    (
        AxisBounds::new(-hw * over, hw * over),
        AxisBounds::new(-hh * over, hh * over),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const W: f32 = 720.0;
    const H: f32 = 1280.0;

    fn engine() -> GestureEngine {
        let mut e = GestureEngine::new(GestureConfig::default(), W, H);
        e.set_container(ContainerState {
            offset: 5000.0,
            max_offset: 10_000.0,
            at_first: false,
            at_last: false,
        });
        e
    }

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    fn settle(e: &mut GestureEngine, t0: Instant, until_ms: u64) -> Vec<Effect> {
        let mut all = Vec::new();
        let mut t = 0;
        while t <= until_ms {
            all.extend(e.tick(ms(t0, t)));
            t += 16;
        }
        all
    }

    fn drag(e: &mut GestureEngine, t0: Instant, from: (f32, f32), to: (f32, f32), steps: u64) -> Vec<Effect> {
        let mut fx = e.handle(GestureEvent::Down { x: from.0, y: from.1 }, t0);
        for i in 1..=steps {
            let (f, n) = (i as f32, steps as f32);
            let p = (from.0 + (to.0 - from.0) * f / n, from.1 + (to.1 - from.1) * f / n);
            fx.extend(e.handle(GestureEvent::Move { x: p.0, y: p.1 }, ms(t0, i * 16)));
        }
        fx
    }

    #[test]
    fn release_at_zero_velocity_goes_idle_without_moving() {
        let mut e = engine();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 800.0), (300.0, 700.0), 4);
        let before = *e.state();
        // hold still long enough for the velocity window to empty
        e.handle(GestureEvent::Move { x: 300.0, y: 700.0 }, ms(t0, 400));
        let fx = e.handle(GestureEvent::Up { x: 300.0, y: 700.0 }, ms(t0, 450));
        assert!(fx.is_empty(), "{fx:?}");
        assert_eq!(e.phase(), Phase::Idle);
        assert_eq!(e.state().offset, before.offset);
        assert!(e.tick(ms(t0, 1000)).is_empty());
    }

    #[test]
    fn drag_scrolls_container_at_scale_one() {
        let mut e = engine();
        let fx = drag(&mut e, Instant::now(), (300.0, 800.0), (300.0, 700.0), 4);
        assert_eq!(e.phase(), Phase::Dragging);
        assert_eq!(e.state().offset, 5100.0);
        assert_eq!(e.state().direction, ScrollDirection::Forward);
        assert!(matches!(fx.last(), Some(Effect::ScrollTo(o)) if *o == 5100.0));
    }

    #[test]
    fn pan_at_scale_one_keeps_translation_zero() {
        let mut e = engine();
        let fx = drag(&mut e, Instant::now(), (100.0, 600.0), (400.0, 600.0), 5);
        assert_eq!((e.state().x, e.state().y), (0.0, 0.0));
        assert!(!fx.iter().any(|f| matches!(f, Effect::TransformChanged { .. })));
    }

    #[test]
    fn small_moves_stay_within_slop() {
        let mut e = engine();
        let fx = drag(&mut e, Instant::now(), (300.0, 800.0), (303.0, 804.0), 3);
        assert!(fx.is_empty());
        assert_eq!(e.state().offset, 5000.0);
    }

    #[test]
    fn fast_release_flings_and_settles() {
        let mut e = engine();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 1000.0), (300.0, 700.0), 3);
        e.handle(GestureEvent::Up { x: 300.0, y: 600.0 }, ms(t0, 64));
        assert_eq!(e.phase(), Phase::Flinging);
        let start = e.state().offset;

        let fx = settle(&mut e, ms(t0, 64), 10_000);
        assert_eq!(e.phase(), Phase::Idle);
        assert!(e.state().offset > start);
        let offsets: Vec<f32> = fx
            .iter()
            .filter_map(|f| match f {
                Effect::ScrollTo(o) => Some(*o),
                _ => None,
            })
            .collect();
        assert!(offsets.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn fling_stops_at_container_bound() {
        let mut e = engine();
        e.set_container(ContainerState {
            offset: 9990.0,
            max_offset: 10_000.0,
            at_first: false,
            at_last: false,
        });
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 1000.0), (300.0, 700.0), 3);
        e.handle(GestureEvent::Up { x: 300.0, y: 600.0 }, ms(t0, 64));
        settle(&mut e, ms(t0, 64), 5_000);
        assert_eq!(e.state().offset, 10_000.0);
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn down_cancels_fling() {
        let mut e = engine();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 1000.0), (300.0, 700.0), 3);
        e.handle(GestureEvent::Up { x: 300.0, y: 600.0 }, ms(t0, 64));
        e.tick(ms(t0, 100));
        assert_eq!(e.phase(), Phase::Flinging);
        let at = e.state().offset;
        e.handle(GestureEvent::Down { x: 10.0, y: 10.0 }, ms(t0, 120));
        assert_eq!(e.phase(), Phase::Dragging);
        assert!(e.tick(ms(t0, 400)).is_empty());
        assert_eq!(e.state().offset, at);
    }

    #[test]
    fn single_tap_is_confirmed_after_timeout() {
        let mut e = engine();
        let t0 = Instant::now();
        e.handle(GestureEvent::Down { x: 50.0, y: 60.0 }, t0);
        assert!(e.handle(GestureEvent::Up { x: 50.0, y: 60.0 }, ms(t0, 80)).is_empty());
        assert!(e.tick(ms(t0, 200)).is_empty());
        assert_eq!(e.tick(ms(t0, 400)), vec![Effect::Tap { x: 50.0, y: 60.0 }]);
        assert!(e.tick(ms(t0, 800)).is_empty());
    }

    #[test]
    fn double_tap_toggles_zoom() {
        let mut e = engine();
        let t0 = Instant::now();
        for (down, up) in [(0, 50), (150, 200)] {
            e.handle(GestureEvent::Down { x: 200.0, y: 640.0 }, ms(t0, down));
            e.handle(GestureEvent::Up { x: 200.0, y: 640.0 }, ms(t0, up));
        }
        let fx = settle(&mut e, ms(t0, 200), 600);
        assert!(!fx.iter().any(|f| matches!(f, Effect::Tap { .. })));
        assert_eq!(e.state().scale, 2.0);
        // toward the tap point: (360 - 200) * (2 - 1)
        assert_eq!(e.state().x, 160.0);
        assert_eq!(e.state().y, 0.0);

        let t1 = ms(t0, 2000);
        for (down, up) in [(0, 50), (150, 200)] {
            e.handle(GestureEvent::Down { x: 200.0, y: 640.0 }, ms(t1, down));
            e.handle(GestureEvent::Up { x: 200.0, y: 640.0 }, ms(t1, up));
        }
        settle(&mut e, ms(t1, 200), 600);
        assert_eq!(e.state().scale, 1.0);
        assert_eq!((e.state().x, e.state().y), (0.0, 0.0));
    }

    #[test]
    fn long_press_suppresses_tap() {
        let mut e = engine();
        let t0 = Instant::now();
        e.handle(GestureEvent::Down { x: 30.0, y: 40.0 }, t0);
        assert!(e.tick(ms(t0, 300)).is_empty());
        assert_eq!(e.tick(ms(t0, 600)), vec![Effect::LongPress { x: 30.0, y: 40.0 }]);
        assert!(e.tick(ms(t0, 700)).is_empty());
        e.handle(GestureEvent::Up { x: 30.0, y: 40.0 }, ms(t0, 800));
        assert!(e.tick(ms(t0, 2000)).is_empty());
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn pinch_clamps_and_snaps_back() {
        let mut e = engine();
        let t0 = Instant::now();
        let (fx_, fy_) = (W / 2.0, H / 2.0);
        e.handle(GestureEvent::PinchBegin { focus_x: fx_, focus_y: fy_, span: 100.0 }, t0);
        e.handle(GestureEvent::Pinch { focus_x: fx_, focus_y: fy_, span: 300.0 }, ms(t0, 16));
        assert!((e.state().scale - 3.0).abs() < 1e-4);
        e.handle(GestureEvent::Pinch { focus_x: fx_, focus_y: fy_, span: 3000.0 }, ms(t0, 32));
        assert_eq!(e.state().scale, 8.0);
        e.handle(GestureEvent::Pinch { focus_x: fx_, focus_y: fy_, span: 1.0 }, ms(t0, 48));
        assert_eq!(e.state().scale, PINCH_FLOOR);
        assert_eq!((e.state().x, e.state().y), (0.0, 0.0));

        e.handle(GestureEvent::PinchEnd, ms(t0, 64));
        settle(&mut e, ms(t0, 64), 400);
        assert_eq!(e.state().scale, 1.0);
    }

    #[test]
    fn zoomed_pan_is_clamped_and_vertical_goes_to_container() {
        let mut e = engine();
        let t0 = Instant::now();
        e.handle(GestureEvent::PinchBegin { focus_x: W / 2.0, focus_y: H / 2.0, span: 100.0 }, t0);
        e.handle(GestureEvent::Pinch { focus_x: W / 2.0, focus_y: H / 2.0, span: 200.0 }, ms(t0, 16));
        e.handle(GestureEvent::PinchEnd, ms(t0, 32));
        assert_eq!(e.state().scale, 2.0);

        let t1 = ms(t0, 100);
        drag(&mut e, t1, (100.0, 600.0), (600.0, 500.0), 5);
        // |x| <= 360 * (2 - 1)
        assert_eq!(e.state().x, 360.0);
        assert_eq!(e.state().y, 0.0);
        // 100px of finger travel at scale 2 is 50px of content
        assert_eq!(e.state().offset, 5050.0);
    }

    #[test]
    fn zoomed_vertical_pan_is_free_at_first_panel() {
        let mut e = engine();
        e.set_container(ContainerState {
            offset: 0.0,
            max_offset: 10_000.0,
            at_first: true,
            at_last: false,
        });
        let t0 = Instant::now();
        e.handle(GestureEvent::PinchBegin { focus_x: W / 2.0, focus_y: H / 2.0, span: 100.0 }, t0);
        e.handle(GestureEvent::Pinch { focus_x: W / 2.0, focus_y: H / 2.0, span: 200.0 }, ms(t0, 16));
        e.handle(GestureEvent::PinchEnd, ms(t0, 32));

        let t1 = ms(t0, 100);
        drag(&mut e, t1, (300.0, 400.0), (300.0, 700.0), 5);
        assert_eq!(e.state().y, 300.0);
        assert_eq!(e.state().offset, 0.0);

        // past the translation bound the remainder scrolls the container
        let t2 = ms(t0, 1000);
        e.handle(GestureEvent::Up { x: 300.0, y: 700.0 }, ms(t1, 900));
        drag(&mut e, t2, (300.0, 1200.0), (300.0, 0.0), 6);
        assert_eq!(e.state().y, -640.0);
        // 1200 - (300 + 640) = 260 screen px left over, 130 content px
        assert_eq!(e.state().offset, 130.0);
    }

    fn zoomed_at_last_panel() -> GestureEngine {
        let mut e = engine();
        e.set_container(ContainerState {
            offset: 10_000.0,
            max_offset: 10_000.0,
            at_first: false,
            at_last: true,
        });
        let t0 = Instant::now();
        e.handle(GestureEvent::PinchBegin { focus_x: W / 2.0, focus_y: H / 2.0, span: 100.0 }, t0);
        e.handle(GestureEvent::Pinch { focus_x: W / 2.0, focus_y: H / 2.0, span: 200.0 }, ms(t0, 16));
        e.handle(GestureEvent::PinchEnd, ms(t0, 32));
        assert_eq!(e.state().scale, 2.0);
        e
    }

    #[test]
    fn zoomed_vertical_pan_is_free_at_last_panel() {
        let mut e = zoomed_at_last_panel();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 900.0), (300.0, 600.0), 5);
        assert_eq!(e.state().y, -300.0);
        assert_eq!(e.state().offset, 10_000.0);

        e.handle(GestureEvent::Up { x: 300.0, y: 600.0 }, ms(t0, 900));
        let t1 = ms(t0, 1000);
        drag(&mut e, t1, (300.0, 200.0), (300.0, 1200.0), 5);
        assert_eq!(e.state().y, 640.0);
        // 1000 - 940 = 60 screen px back up the strip, 30 content px
        assert_eq!(e.state().offset, 9970.0);
    }

    #[test]
    fn zoomed_fling_at_last_panel_settles_inside_translation_bounds() {
        let mut e = zoomed_at_last_panel();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 1000.0), (300.0, 400.0), 3);
        e.handle(GestureEvent::Up { x: 300.0, y: 400.0 }, ms(t0, 56));
        assert_eq!(e.phase(), Phase::Flinging);

        let fx = settle(&mut e, ms(t0, 56), 6000);
        assert_eq!(e.phase(), Phase::Idle);
        // |y| <= 640 * (2 - 1) on every frame; the container never moves
        for f in &fx {
            match f {
                Effect::TransformChanged { y, .. } => assert!(y.abs() <= 640.0, "{f:?}"),
                Effect::ScrollTo(_) => panic!("fling moved the container: {f:?}"),
                _ => {}
            }
        }
        assert_eq!(e.state().y, -640.0);
        assert_eq!(e.state().x, 0.0);
        assert_eq!(e.state().offset, 10_000.0);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let mut e = engine();
        let t0 = Instant::now();
        drag(&mut e, t0, (300.0, 800.0), (300.0, 700.0), 2);
        e.handle(GestureEvent::Cancel, ms(t0, 40));
        assert_eq!(e.phase(), Phase::Idle);
        assert!(e.handle(GestureEvent::Up { x: 0.0, y: 0.0 }, ms(t0, 60)).is_empty());
        assert!(e.tick(ms(t0, 1000)).is_empty());
    }
}
