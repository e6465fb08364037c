//! Visible-window resolver: scroll position -> center panel -> prefetch
//! window of panel indices to keep materialized.

use std::ops::RangeInclusive;

use log::debug;

use crate::layout::OffsetIndex;

/// Direction of the most recent non-zero scroll movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    /// Toward higher offsets / later panels.
    #[default]
    Forward,
    /// Toward lower offsets / earlier panels.
    Backward,
}

impl ScrollDirection {
    /// Direction implied by a position delta; `None` for no movement.
    pub fn from_delta(delta: f32) -> Option<Self> {
        if delta > 0.0 {
            Some(Self::Forward)
        } else if delta < 0.0 {
            Some(Self::Backward)
        } else {
            None
        }
    }
}

/// Window of panel indices around `center`.
///
/// `[max(0, center - prefetch), min(last, center + capacity - prefetch)]`
pub fn compute_window(
    center: usize,
    pool_capacity: usize,
    prefetch_distance: usize,
    last_index: usize,
) -> RangeInclusive<usize> {
    let center = center.min(last_index);
    let start = center.saturating_sub(prefetch_distance);
    let end = (center + pool_capacity)
        .saturating_sub(prefetch_distance)
        .min(last_index)
        .max(start);
    start..=end
}

/// Reported when the center panel changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowChange {
    pub center: usize,
    pub window: RangeInclusive<usize>,
}

/// Owns the offset index and remembers the last resolved center so the
/// window is recomputed only when the closest panel changes.
pub struct WindowResolver {
    index: OffsetIndex,
    pool_capacity: usize,
    prefetch_distance: usize,
    center: Option<usize>,
    window: Option<RangeInclusive<usize>>,
}

impl WindowResolver {
    pub fn new(index: OffsetIndex, pool_capacity: usize, prefetch_distance: usize) -> Self {
        Self {
            index,
            pool_capacity,
            prefetch_distance,
            center: None,
            window: None,
        }
    }

    pub fn index(&self) -> &OffsetIndex {
        &self.index
    }

    /// Install a new offset index, discarding the old one.
    ///
    /// The cached center is forgotten so the next `resolve` reports a window.
    pub fn rebuild(&mut self, index: OffsetIndex) {
        debug!(
            "window: rebuild ({} -> {} entries)",
            self.index.len(),
            index.len()
        );
        self.index = index;
        self.center = None;
        self.window = None;
    }

    /// Resolve `position` to a window; `None` when the center is unchanged
    /// (or the index is empty).
    pub fn resolve(&mut self, position: f32) -> Option<WindowChange> {
        let center = self.index.nearest_index(position)?;
        if self.center == Some(center) {
            return None;
        }
        let last = self.index.last_index()?;
        let window = compute_window(center, self.pool_capacity, self.prefetch_distance, last);
        debug!(
            "window: center {:?} -> {center}, window {}..={} (position={position:.1})",
            self.center,
            window.start(),
            window.end()
        );
        self.center = Some(center);
        self.window = Some(window.clone());
        Some(WindowChange { center, window })
    }

    pub fn center(&self) -> Option<usize> {
        self.center
    }

    pub fn current(&self) -> Option<RangeInclusive<usize>> {
        self.window.clone()
    }
}
