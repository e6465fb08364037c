//! Offset index: vertical placement of panels inside the virtual scroll
//! container, plus nearest-panel lookup by binary search.
//!
//! The index is immutable once built. Any change to the panel list or the
//! container width builds a fresh `OffsetIndex` that replaces the old one
//! wholesale (see `WindowResolver::rebuild`).

use std::time::Instant;

use log::{info, warn};

/// Placement of one panel within the scroll container (pixels).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutEntry {
    /// Top edge of the panel.
    pub offset: f32,
    /// Rendered height (`container_width / aspect_ratio`).
    pub height: f32,
}

impl LayoutEntry {
    /// Bottom edge of the panel (exclusive of spacing).
    pub fn bottom(&self) -> f32 {
        self.offset + self.height
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffsetIndex {
    entries: Vec<LayoutEntry>,
    spacing: f32,
}

impl OffsetIndex {
    /// Build from already-rendered panel heights.
    ///
    /// `spacing` is inserted between consecutive panels, not after the last.
    pub fn from_heights(heights: &[f32], spacing: f32) -> Self {
        let mut entries = Vec::with_capacity(heights.len());
        let mut cursor = 0.0f32;
        for (i, &h) in heights.iter().enumerate() {
            let height = h.max(0.0);
            entries.push(LayoutEntry { offset: cursor, height });
            cursor += height;
            if i + 1 < heights.len() {
                cursor += spacing;
            }
        }
        Self { entries, spacing }
    }

    /// Build from panel aspect ratios (width / height) for a container of
    /// `container_width` pixels.
    ///
    /// Ratios that are zero, negative or not finite lay out as square panels.
    pub fn build(aspect_ratios: &[f32], container_width: f32, spacing: f32) -> Self {
        let start = Instant::now();
        let heights: Vec<f32> = aspect_ratios
            .iter()
            .enumerate()
            .map(|(i, &ar)| {
                if ar.is_finite() && ar > 0.0 {
                    container_width / ar
                } else {
                    warn!("layout: panel {i} has invalid aspect ratio {ar}, laying out as square");
                    container_width
                }
            })
            .collect();
        let index = Self::from_heights(&heights, spacing);
        info!(
            "layout: built {} entries in {:.2}ms (width={container_width}, spacing={spacing}, total_height={})",
            index.len(),
            start.elapsed().as_secs_f64() * 1000.0,
            index.total_height()
        );
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&LayoutEntry> {
        self.entries.get(index)
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    /// Index of the last panel, `None` when empty.
    pub fn last_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    /// Total content height (top of the first panel to bottom of the last).
    pub fn total_height(&self) -> f32 {
        self.entries.last().map_or(0.0, LayoutEntry::bottom)
    }

    /// Maximum scroll offset for a viewport of `viewport_h` pixels.
    pub fn max_scroll(&self, viewport_h: f32) -> f32 {
        (self.total_height() - viewport_h).max(0.0)
    }

    /// Offset of panel `index`, clamped to the last panel.
    pub fn offset_of(&self, index: usize) -> f32 {
        match self.last_index() {
            Some(last) => self.entries[index.min(last)].offset,
            None => 0.0,
        }
    }

    /// Panel whose top offset is closest to `position`.
    ///
    /// `None` only for an empty index. Positions before the first panel map
    /// to 0 and positions past the last panel map to the last index. When
    /// `position` is equidistant from two offsets the lower index wins.
    /// NaN maps to 0.
    pub fn nearest_index(&self, position: f32) -> Option<usize> {
        let last = self.last_index()?;
        if last == 0 || position.is_nan() || position <= self.entries[0].offset {
            return Some(0);
        }
        if position >= self.entries[last].offset {
            // Several zero-height panels can share the last offset.
            let lo = self.entries.partition_point(|e| e.offset < self.entries[last].offset);
            return Some(lo);
        }

        // First entry at or after `position`; entries[lo - 1] is strictly before.
        let lo = self.entries.partition_point(|e| e.offset < position);
        let after = self.entries[lo].offset - position;
        let before = position - self.entries[lo - 1].offset;
        if before <= after { Some(lo - 1) } else { Some(lo) }
    }

    /// Panels overlapping `[top, top + height)`.
    pub fn visible_range(&self, top: f32, height: f32) -> Option<std::ops::RangeInclusive<usize>> {
        let last = self.last_index()?;
        let bottom = top + height;
        let first = self.entries.partition_point(|e| e.bottom() <= top).min(last);
        let end = self
            .entries
            .partition_point(|e| e.offset < bottom)
            .saturating_sub(1)
            .max(first);
        Some(first..=end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OffsetIndex {
        OffsetIndex::from_heights(&[100.0, 150.0, 100.0, 200.0, 100.0], 8.0)
    }

    #[test]
    fn offsets_accumulate_heights_and_spacing() {
        let idx = sample();
        let offsets: Vec<f32> = idx.entries().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0.0, 108.0, 266.0, 374.0, 582.0]);
        assert_eq!(idx.total_height(), 682.0);
    }

    #[test]
    fn nearest_index_picks_closer_offset() {
        // |300-266| = 34 < |300-374| = 74
        assert_eq!(sample().nearest_index(300.0), Some(2));
    }

    #[test]
    fn nearest_index_edges() {
        let idx = sample();
        assert_eq!(OffsetIndex::default().nearest_index(10.0), None);
        assert_eq!(OffsetIndex::from_heights(&[50.0], 8.0).nearest_index(9999.0), Some(0));
        assert_eq!(idx.nearest_index(-40.0), Some(0));
        assert_eq!(idx.nearest_index(1.0e9), Some(4));
    }

    #[test]
    fn non_finite_positions_stay_in_range() {
        let idx = OffsetIndex::from_heights(&[100.0, 150.0, 100.0], 8.0);
        assert_eq!(idx.nearest_index(f32::NAN), Some(0));
        assert_eq!(idx.nearest_index(f32::NEG_INFINITY), Some(0));
        assert_eq!(idx.nearest_index(f32::INFINITY), Some(2));
        let range = idx.visible_range(f32::NAN, 200.0).unwrap();
        assert!(*range.end() <= 2);
    }

    #[test]
    fn nearest_index_tie_prefers_lower_index() {
        // midpoint of 0 and 108
        assert_eq!(sample().nearest_index(54.0), Some(0));
        // midpoint of 266 and 374
        assert_eq!(sample().nearest_index(320.0), Some(2));
        assert_eq!(sample().nearest_index(320.5), Some(3));
    }

    #[test]
    fn nearest_index_of_each_offset_is_itself() {
        let idx = OffsetIndex::from_heights(&[10.0, 1.0, 300.0, 42.5, 7.0, 7.0, 90.0], 3.0);
        for (i, e) in idx.entries().iter().enumerate() {
            assert_eq!(idx.nearest_index(e.offset), Some(i), "offset {}", e.offset);
        }
    }

    #[test]
    fn nearest_index_is_monotonic_and_in_range() {
        let idx = OffsetIndex::from_heights(&[120.0, 30.0, 500.0, 64.0, 64.0, 1.0, 250.0], 8.0);
        let last = idx.last_index().unwrap();
        let mut prev = 0;
        let mut p = -100.0f32;
        while p < idx.total_height() + 100.0 {
            let i = idx.nearest_index(p).unwrap();
            assert!(i <= last);
            assert!(i >= prev, "not monotonic at {p}: {prev} -> {i}");
            prev = i;
            p += 0.5;
        }
    }

    #[test]
    fn zero_height_panels_resolve_to_lowest_index() {
        let idx = OffsetIndex::from_heights(&[100.0, 0.0, 0.0, 100.0], 0.0);
        assert_eq!(idx.nearest_index(100.0), Some(1));
        let tail = OffsetIndex::from_heights(&[100.0, 0.0, 0.0], 0.0);
        assert_eq!(tail.nearest_index(500.0), Some(1));
    }

    #[test]
    fn build_from_aspect_ratios() {
        let idx = OffsetIndex::build(&[0.5, 2.0, 0.0], 400.0, 8.0);
        let heights: Vec<f32> = idx.entries().iter().map(|e| e.height).collect();
        assert_eq!(heights, vec![800.0, 200.0, 400.0]);
        assert_eq!(idx.offset_of(2), 1016.0);
        assert_eq!(idx.offset_of(99), 1016.0);
    }

    #[test]
    fn visible_range_covers_viewport() {
        let idx = sample();
        assert_eq!(idx.visible_range(0.0, 50.0), Some(0..=0));
        assert_eq!(idx.visible_range(90.0, 200.0), Some(0..=2));
        // gap between 0 and 1 (100..108)
        assert_eq!(idx.visible_range(102.0, 4.0), Some(1..=1));
        assert_eq!(idx.visible_range(5000.0, 100.0), Some(4..=4));
        assert_eq!(idx.max_scroll(600.0), 82.0);
    }
}
