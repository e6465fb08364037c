//! Surface pool: a fixed-capacity arena of reusable image slots.
//!
//! Slots are created lazily up to `capacity` and then recycled, never
//! destroyed. `bindings` maps panel index -> slot so lookups never search
//! by identity. All mutation happens on the interactive thread; decode
//! workers only ever see `(slot, index, generation)` triples and their
//! results are checked against the slot's current binding before use.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use log::{debug, trace};

use crate::archive::PanelImage;
use crate::window::ScrollDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// One reusable image slot.
#[derive(Debug, Default)]
pub struct Surface {
    bound: Option<usize>,
    translation_y: f32,
    image: Option<Arc<PanelImage>>,
    /// Bumped on every rebind; decode results carry the generation they
    /// were dispatched for.
    generation: u64,
    /// A decode for this slot is queued or running.
    in_flight: bool,
}

impl Surface {
    pub fn bound(&self) -> Option<usize> {
        self.bound
    }

    pub fn translation_y(&self) -> f32 {
        self.translation_y
    }

    pub fn image(&self) -> Option<&Arc<PanelImage>> {
        self.image.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireKind {
    /// The index already had a slot.
    Existing,
    /// A new slot was allocated (pool below capacity).
    Fresh,
    /// A slot was taken from another index (or from the unbound set).
    Recycled { evicted: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub slot: SlotId,
    pub kind: AcquireKind,
}

/// Outcome of delivering a decode result to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Bound,
    /// The slot was rebound after the decode was dispatched.
    Stale,
}

pub struct SurfacePool {
    slots: Vec<Surface>,
    bindings: HashMap<usize, SlotId>,
    capacity: usize,
    window: Option<RangeInclusive<usize>>,
}

impl SurfacePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            bindings: HashMap::with_capacity(capacity),
            capacity,
            window: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots allocated so far (never exceeds capacity).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn surface(&self, slot: SlotId) -> &Surface {
        &self.slots[slot.0]
    }

    pub fn slot_for(&self, index: usize) -> Option<SlotId> {
        self.bindings.get(&index).copied()
    }

    /// Bound indices in ascending order.
    pub fn bound_indices(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.bindings.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Iterate `(slot, surface)` over allocated slots.
    pub fn surfaces(&self) -> impl Iterator<Item = (SlotId, &Surface)> {
        self.slots.iter().enumerate().map(|(i, s)| (SlotId(i), s))
    }

    /// Current prefetch window; slots bound outside it are evicted first.
    pub fn set_window(&mut self, window: Option<RangeInclusive<usize>>) {
        self.window = window;
    }

    /// Get a slot bound to `index`, recycling one if the pool is full.
    ///
    /// A recycled slot has its old image cleared and its generation bumped
    /// before this returns, so nothing stale can be displayed and any decode
    /// still running for the old binding will be rejected by `complete`.
    pub fn acquire(&mut self, index: usize, direction: ScrollDirection, translation_y: f32) -> Acquired {
        if let Some(&slot) = self.bindings.get(&index) {
            self.slots[slot.0].translation_y = translation_y;
            return Acquired {
                slot,
                kind: AcquireKind::Existing,
            };
        }

        if self.slots.len() < self.capacity {
            let slot = SlotId(self.slots.len());
            self.slots.push(Surface {
                bound: Some(index),
                translation_y,
                image: None,
                generation: 1,
                in_flight: false,
            });
            self.bindings.insert(index, slot);
            trace!("pool: fresh slot {} -> panel {index}", slot.0);
            return Acquired {
                slot,
                kind: AcquireKind::Fresh,
            };
        }

        let slot = self.pick_victim(direction);
        let surface = &mut self.slots[slot.0];
        let evicted = surface.bound.take();
        if let Some(old) = evicted {
            self.bindings.remove(&old);
        }
        surface.bound = Some(index);
        surface.translation_y = translation_y;
        surface.image = None;
        surface.generation += 1;
        self.bindings.insert(index, slot);
        debug!(
            "pool: recycle slot {} panel {evicted:?} -> {index} ({direction:?})",
            slot.0
        );
        Acquired {
            slot,
            kind: AcquireKind::Recycled { evicted },
        }
    }

    /// Victim order: unbound slots, then slots outside the window, then
    /// everything; within a group the slot farthest behind the direction of
    /// travel (lowest index going forward, highest going backward).
    fn pick_victim(&self, direction: ScrollDirection) -> SlotId {
        if let Some(i) = self.slots.iter().position(|s| s.bound.is_none()) {
            return SlotId(i);
        }
        let outside = |idx: &usize| self.window.as_ref().is_none_or(|w| !w.contains(idx));
        let behind = |candidates: &mut dyn Iterator<Item = usize>| match direction {
            ScrollDirection::Forward => candidates.min(),
            ScrollDirection::Backward => candidates.max(),
        };
        let victim_index = behind(&mut self.bindings.keys().copied().filter(outside))
            .or_else(|| behind(&mut self.bindings.keys().copied()))
            .unwrap_or_default();
        self.bindings[&victim_index]
    }

    /// Mark a decode as dispatched for `slot`; returns the generation the
    /// result must match. `None` if a decode is already in flight.
    pub fn begin_load(&mut self, slot: SlotId) -> Option<u64> {
        let surface = &mut self.slots[slot.0];
        if surface.in_flight {
            return None;
        }
        surface.in_flight = true;
        Some(surface.generation)
    }

    /// True when `slot` is bound, has no image, and nothing is decoding.
    pub fn needs_load(&self, slot: SlotId) -> bool {
        let s = &self.slots[slot.0];
        s.bound.is_some() && s.image.is_none() && !s.in_flight
    }

    /// Deliver a decode result. Applied only if the slot is still bound to
    /// `index` at `generation`; the in-flight flag is cleared either way.
    pub fn complete(
        &mut self,
        slot: SlotId,
        index: usize,
        generation: u64,
        image: Option<Arc<PanelImage>>,
    ) -> Applied {
        let Some(surface) = self.slots.get_mut(slot.0) else {
            return Applied::Stale;
        };
        surface.in_flight = false;
        if surface.bound != Some(index) || surface.generation != generation {
            trace!(
                "pool: stale completion slot {} panel {index} gen {generation} (now {:?} gen {})",
                slot.0,
                surface.bound,
                surface.generation
            );
            return Applied::Stale;
        }
        surface.image = image;
        Applied::Bound
    }

    /// Unbind every slot (layout rebuilt). Slots stay allocated.
    pub fn reset(&mut self) {
        for s in &mut self.slots {
            s.bound = None;
            s.image = None;
            s.generation += 1;
        }
        self.bindings.clear();
        self.window = None;
        debug!("pool: reset {} slots", self.slots.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScrollDirection::{Backward, Forward};

    fn img() -> Option<Arc<PanelImage>> {
        Some(Arc::new(PanelImage::new_rgb8(2, 3)))
    }

    fn assert_unique_bindings(pool: &SurfacePool) {
        let mut seen = std::collections::HashSet::new();
        for (_, s) in pool.surfaces() {
            if let Some(i) = s.bound() {
                assert!(seen.insert(i), "index {i} bound twice");
            }
        }
    }

    #[test]
    fn fills_then_recycles_lowest_going_forward() {
        let mut pool = SurfacePool::new(3);
        for i in 0..10 {
            pool.acquire(i, Forward, 0.0);
            assert!(pool.len() <= 3);
            assert_unique_bindings(&pool);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.bound_indices(), vec![7, 8, 9]);
    }

    #[test]
    fn recycles_highest_going_backward() {
        let mut pool = SurfacePool::new(3);
        for i in (0..10).rev() {
            pool.acquire(i, Backward, 0.0);
        }
        assert_eq!(pool.bound_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn acquire_existing_is_stable() {
        let mut pool = SurfacePool::new(2);
        let a = pool.acquire(4, Forward, 10.0);
        assert_eq!(a.kind, AcquireKind::Fresh);
        let b = pool.acquire(4, Forward, 20.0);
        assert_eq!(b.kind, AcquireKind::Existing);
        assert_eq!(a.slot, b.slot);
        assert_eq!(pool.surface(b.slot).translation_y(), 20.0);
    }

    #[test]
    fn recycle_clears_image_and_reports_eviction() {
        let mut pool = SurfacePool::new(1);
        let a = pool.acquire(0, Forward, 0.0);
        let generation = pool.begin_load(a.slot).unwrap();
        assert_eq!(pool.complete(a.slot, 0, generation, img()), Applied::Bound);
        assert!(pool.surface(a.slot).image().is_some());

        let b = pool.acquire(1, Forward, 0.0);
        assert_eq!(b.slot, a.slot);
        assert_eq!(b.kind, AcquireKind::Recycled { evicted: Some(0) });
        assert!(pool.surface(b.slot).image().is_none());
        assert_eq!(pool.slot_for(0), None);
        assert_eq!(pool.slot_for(1), Some(b.slot));
    }

    #[test]
    fn stale_completion_is_dropped() {
        let mut pool = SurfacePool::new(1);
        let a = pool.acquire(0, Forward, 0.0);
        let old_gen = pool.begin_load(a.slot).unwrap();

        // rebound before the decode for panel 0 finished
        pool.acquire(1, Forward, 0.0);
        assert_eq!(pool.complete(a.slot, 0, old_gen, img()), Applied::Stale);
        assert!(pool.surface(a.slot).image().is_none());
        assert!(!pool.surface(a.slot).in_flight());
    }

    #[test]
    fn same_index_rebound_later_still_rejects_old_generation() {
        let mut pool = SurfacePool::new(1);
        let a = pool.acquire(0, Forward, 0.0);
        let old_gen = pool.begin_load(a.slot).unwrap();
        pool.acquire(1, Forward, 0.0);
        pool.acquire(0, Backward, 0.0);
        assert_eq!(pool.complete(a.slot, 0, old_gen, img()), Applied::Stale);
    }

    #[test]
    fn one_decode_in_flight_per_slot() {
        let mut pool = SurfacePool::new(1);
        let a = pool.acquire(0, Forward, 0.0);
        assert!(pool.needs_load(a.slot));
        assert!(pool.begin_load(a.slot).is_some());
        assert!(pool.begin_load(a.slot).is_none());
        pool.acquire(1, Forward, 0.0);
        // still waiting on the old decode
        assert!(!pool.needs_load(a.slot));
    }

    #[test]
    fn slots_outside_the_window_are_recycled_before_farthest_behind() {
        let mut pool = SurfacePool::new(3);
        for i in [9, 30, 31] {
            pool.acquire(i, Forward, 0.0);
        }
        pool.set_window(Some(8..=12));
        // 9 is the lowest but lies in the window; 30 goes first
        let a = pool.acquire(10, Forward, 0.0);
        assert_eq!(a.kind, AcquireKind::Recycled { evicted: Some(30) });
        let b = pool.acquire(11, Forward, 0.0);
        assert_eq!(b.kind, AcquireKind::Recycled { evicted: Some(31) });
        assert_eq!(pool.bound_indices(), vec![9, 10, 11]);
    }

    #[test]
    fn reset_unbinds_and_reuses_slots() {
        let mut pool = SurfacePool::new(2);
        pool.acquire(0, Forward, 0.0);
        pool.acquire(1, Forward, 0.0);
        pool.reset();
        assert!(pool.bound_indices().is_empty());
        assert_eq!(pool.len(), 2);
        let a = pool.acquire(7, Forward, 0.0);
        assert!(matches!(a.kind, AcquireKind::Recycled { evicted: None }));
        assert_eq!(pool.len(), 2);
    }
}
