//! Reader session: one open archive, driven from the interactive thread.
//!
//! Owns the window resolver (and through it the offset index), the gesture
//! engine, the surface pool, the decode loader and the progress reporter.
//! Nothing here is global; dropping the session joins the decode workers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, trace, warn};

use crate::archive::{PanelDecoder, PanelImage};
use crate::config::Config;
use crate::gesture::{ContainerState, Effect, GestureEngine, GestureEvent, Phase, ScrollState};
use crate::layout::OffsetIndex;
use crate::library::{MangaFile, Panel};
use crate::loader::{DecodeCompletion, PanelLoader};
use crate::pool::{Applied, SlotId, SurfacePool};
use crate::progress::{ProgressReporter, ProgressStore, ReadingPosition};
use crate::window::{ScrollDirection, WindowResolver};

/// A panel that intersects the viewport.
#[derive(Debug, Clone)]
pub struct VisibleSurface {
    pub index: usize,
    /// Top edge in content pixels.
    pub offset: f32,
    pub height: f32,
    /// `None` while decoding, or for a panel that failed.
    pub image: Option<Arc<PanelImage>>,
    pub failed: bool,
}

pub struct ReaderSession<S: ProgressStore> {
    archive_id: u64,
    archive: Arc<PathBuf>,
    panels: Vec<Panel>,
    width: f32,
    viewport_height: f32,
    resolver: WindowResolver,
    engine: GestureEngine,
    pool: SurfacePool,
    loader: PanelLoader,
    reporter: ProgressReporter<S>,
    /// Indices materialized for the current window, highest priority first.
    materialized: Vec<usize>,
    /// Panels whose decode failed; never dispatched again.
    failed: BTreeSet<usize>,
}

impl<S: ProgressStore> ReaderSession<S> {
    /// Open `manga` at its saved reading position.
    pub fn open(
        manga: &MangaFile,
        decoder: Arc<dyn PanelDecoder>,
        store: S,
        config: &Config,
        now: Instant,
    ) -> Result<Self> {
        let start = Instant::now();
        let reader = &config.reader;
        let index = OffsetIndex::build(&manga.aspect_ratios(), config.width, reader.spacing);
        let loader = PanelLoader::new(decoder, reader.decode_workers)?;
        let mut reporter = ProgressReporter::new(store, manga.id, config.progress.clone());
        reporter.restore(manga.position());

        let mut session = Self {
            archive_id: manga.id,
            archive: Arc::new(manga.path.clone()),
            panels: manga.panels.clone(),
            width: config.width,
            viewport_height: config.viewport_height,
            resolver: WindowResolver::new(index, reader.pool_capacity, reader.prefetch_distance),
            engine: GestureEngine::new(config.gesture.clone(), config.width, config.viewport_height),
            pool: SurfacePool::new(reader.pool_capacity),
            loader,
            reporter,
            materialized: Vec::new(),
            failed: BTreeSet::new(),
        };
        session.sync_container();

        let saved = manga.position();
        let offset = if saved.offset > 0.0 {
            saved.offset
        } else {
            session.resolver.index().offset_of(saved.page)
        };
        session.engine.scroll_to(offset);
        session.update_window(now);
        info!(
            "session: opened {} ({} panels) at offset {:.1} in {:.1}ms",
            manga.path.display(),
            session.panels.len(),
            session.engine.state().offset,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(session)
    }

    pub fn archive_id(&self) -> u64 {
        self.archive_id
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn index(&self) -> &OffsetIndex {
        self.resolver.index()
    }

    pub fn state(&self) -> &ScrollState {
        self.engine.state()
    }

    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    pub fn center(&self) -> Option<usize> {
        self.resolver.center()
    }

    pub fn window(&self) -> Option<std::ops::RangeInclusive<usize>> {
        self.resolver.current()
    }

    pub fn pool(&self) -> &SurfacePool {
        &self.pool
    }

    pub fn failed(&self) -> &BTreeSet<usize> {
        &self.failed
    }

    pub fn reporter(&self) -> &ProgressReporter<S> {
        &self.reporter
    }

    pub fn is_animating(&self) -> bool {
        self.engine.is_animating()
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Feed one pointer event. Returns the engine's effects after they have
    /// been applied, so the host can react to taps and long presses.
    pub fn handle_gesture(&mut self, event: GestureEvent, now: Instant) -> Vec<Effect> {
        let effects = self.engine.handle(event, now);
        self.apply_effects(&effects, now);
        effects
    }

    /// Per-frame work: animations, decode completions, debounced progress.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let effects = self.engine.tick(now);
        self.apply_effects(&effects, now);
        self.drain_completions();
        self.reporter.poll(now);
        effects
    }

    pub fn scroll_to(&mut self, offset: f32, now: Instant) {
        let effects = self.engine.scroll_to(offset);
        self.apply_effects(&effects, now);
    }

    /// Scroll so panel `page` (clamped to the last panel) sits at the top.
    pub fn jump_to_page(&mut self, page: usize, now: Instant) {
        let offset = self.resolver.index().offset_of(page);
        debug!("session: jump to page {page} (offset {offset:.1})");
        self.scroll_to(offset, now);
    }

    fn apply_effects(&mut self, effects: &[Effect], now: Instant) {
        let mut scrolled = false;
        for effect in effects {
            match effect {
                Effect::ScrollTo(_) => scrolled = true,
                Effect::TransformChanged { scale, x, y } => {
                    trace!("session: transform scale={scale:.3} x={x:.1} y={y:.1}");
                }
                Effect::Tap { .. } | Effect::LongPress { .. } => {}
            }
        }
        if scrolled {
            self.update_window(now);
        }
    }

    // -----------------------------------------------------------------------
    // Window and pool
    // -----------------------------------------------------------------------

    fn update_window(&mut self, now: Instant) {
        let position = self.engine.state().offset;
        if let Some(change) = self.resolver.resolve(position) {
            self.pool.set_window(Some(change.window.clone()));
            self.materialize(change.center, change.window);
        }
        self.sync_container();
        if let Some(center) = self.resolver.center() {
            self.reporter.observe(
                ReadingPosition {
                    page: center,
                    offset: position,
                },
                now,
            );
        }
    }

    /// Bind up to `capacity` indices of the window, nearest to the center
    /// first and the direction of travel before the trailing side.
    fn materialize(&mut self, center: usize, window: std::ops::RangeInclusive<usize>) {
        let direction = self.engine.state().direction;
        let (start, end) = (*window.start(), *window.end());
        let later: Vec<usize> = (center + 1..=end).collect();
        let earlier: Vec<usize> = (start..center).rev().collect();
        let (ahead, behind) = match direction {
            ScrollDirection::Forward => (later, earlier),
            ScrollDirection::Backward => (earlier, later),
        };
        let order: Vec<usize> = std::iter::once(center)
            .chain(ahead)
            .chain(behind)
            .take(self.pool.capacity())
            .collect();

        debug!("session: materialize {order:?} (center {center}, {direction:?})");
        for &index in &order {
            let translation_y = self.resolver.index().offset_of(index);
            let acquired = self.pool.acquire(index, direction, translation_y);
            trace!("session: panel {index} -> slot {} {:?}", acquired.slot.0, acquired.kind);
            self.dispatch(acquired.slot, index);
        }
        self.materialized = order;
    }

    fn dispatch(&mut self, slot: SlotId, index: usize) {
        if self.failed.contains(&index) || !self.pool.needs_load(slot) {
            return;
        }
        let Some(panel) = self.panels.get(index) else {
            return;
        };
        if let Some(generation) = self.pool.begin_load(slot) {
            self.loader.load(panel, &self.archive, slot, generation);
        }
    }

    /// Re-dispatch materialized panels whose slot is free again (a stale
    /// completion for the previous binding has come back).
    fn dispatch_deferred(&mut self) {
        let order = std::mem::take(&mut self.materialized);
        for &index in &order {
            if let Some(slot) = self.pool.slot_for(index) {
                self.dispatch(slot, index);
            }
        }
        self.materialized = order;
    }

    fn sync_container(&mut self) {
        let index = self.resolver.index();
        let center = self.resolver.center();
        self.engine.set_container(ContainerState {
            offset: self.engine.state().offset,
            max_offset: index.max_scroll(self.viewport_height),
            at_first: center == Some(0),
            at_last: center.is_some() && center == index.last_index(),
        });
    }

    // -----------------------------------------------------------------------
    // Decode completions
    // -----------------------------------------------------------------------

    /// Apply every completion that has arrived. Returns how many were bound.
    pub fn drain_completions(&mut self) -> usize {
        let done = self.loader.drain();
        if done.is_empty() {
            return 0;
        }
        let mut bound = 0;
        for d in done {
            let ok = d.result.is_ok();
            if self.apply_completion(d) == Applied::Bound && ok {
                bound += 1;
            }
        }
        self.dispatch_deferred();
        bound
    }

    fn apply_completion(&mut self, done: DecodeCompletion) -> Applied {
        let DecodeCompletion {
            slot,
            index,
            generation,
            result,
            elapsed,
        } = done;
        let image = match result {
            Ok(image) => Some(image),
            Err(e) => {
                if self.failed.insert(index) {
                    warn!("session: panel {index} failed: {e}");
                }
                None
            }
        };
        let applied = self.pool.complete(slot, index, generation, image);
        trace!(
            "session: completion panel {index} slot {} gen {generation} -> {applied:?} ({:.1}ms)",
            slot.0,
            elapsed.as_secs_f64() * 1000.0
        );
        applied
    }

    /// Block until every in-flight decode has landed (for headless use).
    /// Returns false if `timeout` passed first.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_completions();
            if !self.pool.surfaces().any(|(_, s)| s.in_flight()) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("session: timed out waiting for decodes");
                return false;
            }
            if let Some(done) = self.loader.wait_one(remaining) {
                self.apply_completion(done);
                self.dispatch_deferred();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rebuilds
    // -----------------------------------------------------------------------

    /// Install a new panel list (e.g. after a rescan). The offset is kept
    /// and clamped to the new content.
    pub fn replace_panels(&mut self, panels: Vec<Panel>, now: Instant) {
        let ratios: Vec<f32> = panels.iter().map(|p| p.aspect_ratio).collect();
        self.panels = panels;
        let spacing = self.resolver.index().spacing();
        self.rebuild(OffsetIndex::build(&ratios, self.width, spacing), now);
        let offset = self.engine.state().offset;
        self.scroll_to(offset, now);
    }

    /// Change the container width or viewport height, keeping the center
    /// panel and the relative position inside it.
    pub fn resize(&mut self, width: f32, viewport_height: f32, now: Instant) {
        let old_offset = self.engine.state().offset;
        let anchor = self.resolver.center().map(|c| {
            let top = self.resolver.index().offset_of(c);
            (c, (old_offset - top) * width / self.width.max(1.0))
        });
        self.width = width;
        self.viewport_height = viewport_height;
        self.engine.set_viewport(width, viewport_height);
        let ratios: Vec<f32> = self.panels.iter().map(|p| p.aspect_ratio).collect();
        let spacing = self.resolver.index().spacing();
        self.rebuild(OffsetIndex::build(&ratios, width, spacing), now);
        let offset = anchor.map_or(0.0, |(c, within)| self.resolver.index().offset_of(c) + within);
        self.scroll_to(offset, now);
    }

    fn rebuild(&mut self, index: OffsetIndex, now: Instant) {
        self.resolver.rebuild(index);
        self.pool.reset();
        self.materialized.clear();
        self.failed.clear();
        self.sync_container();
        self.update_window(now);
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Panels intersecting the viewport under the current zoom transform.
    pub fn visible_surfaces(&self) -> Vec<VisibleSurface> {
        let state = self.engine.state();
        let scale = state.scale.max(f32::EPSILON);
        let cy = self.viewport_height / 2.0;
        // Screen rows 0 and viewport_height mapped back to content rows.
        let top = state.offset + cy + (0.0 - cy - state.y) / scale;
        let bottom = state.offset + cy + (self.viewport_height - cy - state.y) / scale;
        let index = self.resolver.index();
        let Some(range) = index.visible_range(top, bottom - top) else {
            return Vec::new();
        };
        range
            .filter_map(|i| {
                let entry = index.entry(i)?;
                let image = self
                    .pool
                    .slot_for(i)
                    .and_then(|slot| self.pool.surface(slot).image().cloned());
                Some(VisibleSurface {
                    index: i,
                    offset: entry.offset,
                    height: entry.height,
                    image,
                    failed: self.failed.contains(&i),
                })
            })
            .collect()
    }

    pub fn viewport(&self) -> (f32, f32) {
        (self.width, self.viewport_height)
    }

    /// Flush pending progress and hand the store back.
    pub fn close(mut self) -> S {
        self.reporter.flush();
        info!("session: closed archive {}", self.archive_id);
        self.reporter.into_store()
    }
}
