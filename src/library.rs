//! Library store: manga archives in a folder, their covers, measured panel
//! aspect ratios and reading progress, persisted as TOML.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::archive::{LoadError, PanelDecoder, is_manga_file};
use crate::natsort::natural_cmp;
use crate::progress::{ProgressStore, ReadingPosition};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One page of an archive. Immutable once measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub archive_id: u64,
    /// Position in reading order.
    pub index: usize,
    /// Entry name inside the archive; the decode key.
    pub entry_name: String,
    /// Width / height.
    pub aspect_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaFile {
    pub id: u64,
    pub path: PathBuf,
    pub name: String,
    pub cover_path: PathBuf,
    #[serde(default)]
    pub current_page: usize,
    #[serde(default)]
    pub scroll_offset: f32,
    pub total_pages: usize,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    /// Empty until the aspect-ratio scan has run.
    #[serde(default)]
    pub panels: Vec<Panel>,
}

impl MangaFile {
    pub fn is_scanned(&self) -> bool {
        !self.panels.is_empty()
    }

    pub fn aspect_ratios(&self) -> Vec<f32> {
        self.panels.iter().map(|p| p.aspect_ratio).collect()
    }

    pub fn position(&self) -> ReadingPosition {
        ReadingPosition {
            page: self.current_page,
            offset: self.scroll_offset,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Library {
    #[serde(default)]
    next_id: u64,
    #[serde(default, rename = "manga")]
    files: Vec<MangaFile>,
}

impl Library {
    pub fn files(&self) -> &[MangaFile] {
        &self.files
    }

    pub fn get(&self, id: u64) -> Option<&MangaFile> {
        self.files.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut MangaFile> {
        self.files.iter_mut().find(|m| m.id == id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&MangaFile> {
        self.files.iter().find(|m| m.path == path)
    }

    /// Insert `manga` under a fresh id and return it.
    pub fn insert(&mut self, mut manga: MangaFile) -> u64 {
        self.next_id = self.next_id.max(self.files.iter().map(|m| m.id).max().unwrap_or(0)) + 1;
        manga.id = self.next_id;
        let id = manga.id;
        self.files.push(manga);
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<MangaFile> {
        let pos = self.files.iter().position(|m| m.id == id)?;
        Some(self.files.remove(pos))
    }

    /// Store the result of an aspect-ratio scan.
    pub fn set_panels(&mut self, id: u64, panels: Vec<Panel>) -> bool {
        match self.get_mut(id) {
            Some(m) => {
                m.panels = panels;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// A `Library` bound to its TOML file.
pub struct LibraryFile {
    path: PathBuf,
    library: Library,
}

impl LibraryFile {
    /// Load `path`; a missing file is an empty library.
    pub fn open(path: &Path) -> Result<Self> {
        let library = match std::fs::read_to_string(path) {
            Ok(text) => {
                let lib: Library = toml::from_str(&text)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                info!("library: loaded {} entries from {}", lib.files.len(), path.display());
                lib
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("library: {} not found, starting empty", path.display());
                Library::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut Library {
        &mut self.library
    }

    /// Write the library, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = toml::to_string(&self.library).context("failed to serialize library")?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        debug!("library: saved {} entries to {}", self.library.files.len(), self.path.display());
        Ok(())
    }
}

impl ProgressStore for LibraryFile {
    fn write(&mut self, archive_id: u64, position: ReadingPosition) -> Result<()> {
        let manga = self
            .library
            .get_mut(archive_id)
            .with_context(|| format!("no library entry with id {archive_id}"))?;
        manga.current_page = position.page;
        manga.scroll_offset = position.offset;
        self.save()
    }
}

// ---------------------------------------------------------------------------
// Folder sync
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: Vec<u64>,
    /// Known archives whose modification time changed; panels cleared.
    pub refreshed: Vec<u64>,
    pub kept: usize,
    pub pruned: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Manga archives directly inside `dir`, in natural file-name order.
pub fn list_manga_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_manga_file(name) && entry.file_type()?.is_file() {
            found.push(entry.path());
        }
    }
    found.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(found)
}

/// Replace path separators so an archive name is a flat file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Cover file name for the archive at `path`. Prefixed with a hash of the
/// full path so equally named archives in different folders do not share
/// a cover.
pub fn cover_file_name(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}-{}", hasher.finish(), sanitize_file_name(&file_name(path)))
}

/// Bring `library` in line with the archives in `dir`.
///
/// New archives are added with their page count and a cover extracted from
/// the first image entry; archives without any image entry are skipped.
/// Known archives keep their id and progress. Entries under `dir` whose
/// archive is gone are removed together with their cover file.
pub fn sync_folder(
    dir: &Path,
    covers_dir: &Path,
    decoder: &dyn PanelDecoder,
    library: &mut Library,
) -> Result<SyncReport> {
    let start = Instant::now();
    let found = list_manga_files(dir)?;
    let found_set: HashSet<&Path> = found.iter().map(PathBuf::as_path).collect();
    let mut report = SyncReport::default();

    let vanished: Vec<(u64, PathBuf)> = library
        .files
        .iter()
        .filter(|m| m.path.parent() == Some(dir) && !found_set.contains(m.path.as_path()))
        .map(|m| (m.id, m.path.clone()))
        .collect();
    for (id, path) in vanished {
        debug!("sync: pruning {}", path.display());
        if let Some(manga) = library.remove(id)
            && let Err(e) = std::fs::remove_file(&manga.cover_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("sync: failed to remove cover {}: {e}", manga.cover_path.display());
        }
        report.pruned.push(path);
    }

    for path in &found {
        let modified = modified_secs(path);
        if let Some(known) = library.files.iter_mut().find(|m| &m.path == path) {
            if known.last_modified == modified {
                report.kept += 1;
                continue;
            }
            match decoder.list_entries(path) {
                Ok(entries) => {
                    debug!("sync: {} changed, {} pages", path.display(), entries.len());
                    known.total_pages = entries.len();
                    known.last_modified = modified;
                    known.panels.clear();
                    if known.current_page >= entries.len() {
                        known.current_page = entries.len().saturating_sub(1);
                    }
                    report.refreshed.push(known.id);
                }
                Err(e) => {
                    warn!("sync: failed to re-read {}: {e}", path.display());
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
            continue;
        }

        match import(path, modified, covers_dir, decoder) {
            Ok(Some(manga)) => {
                let pages = manga.total_pages;
                let id = library.insert(manga);
                debug!("sync: added {} as {id} ({pages} pages)", path.display());
                report.added.push(id);
            }
            Ok(None) => {
                warn!("sync: {} has no image entries, skipping", path.display());
            }
            Err(e) => {
                warn!("sync: failed to import {}: {e:#}", path.display());
                report.failed.push((path.clone(), format!("{e:#}")));
            }
        }
    }

    info!(
        "sync: {} added, {} refreshed, {} kept, {} pruned, {} failed in {:.1}ms",
        report.added.len(),
        report.refreshed.len(),
        report.kept,
        report.pruned.len(),
        report.failed.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(report)
}

fn import(
    path: &Path,
    modified: u64,
    covers_dir: &Path,
    decoder: &dyn PanelDecoder,
) -> Result<Option<MangaFile>> {
    let entries = decoder.list_entries(path)?;
    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let cover_path = covers_dir.join(cover_file_name(path));
    if !cover_path.exists() {
        let bytes = decoder.read_entry(path, first)?;
        std::fs::create_dir_all(covers_dir)
            .with_context(|| format!("failed to create {}", covers_dir.display()))?;
        std::fs::write(&cover_path, bytes)
            .with_context(|| format!("failed to write cover {}", cover_path.display()))?;
        trace!("sync: cover {} -> {}", first, cover_path.display());
    }
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Some(MangaFile {
        id: 0,
        path: path.to_path_buf(),
        name,
        cover_path,
        current_page: 0,
        scroll_offset: 0.0,
        total_pages: entries.len(),
        last_modified: modified,
        panels: Vec::new(),
    }))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn modified_secs(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// Aspect-ratio scan
// ---------------------------------------------------------------------------

/// Measure every image entry of `archive`. Entries that cannot be measured
/// are skipped; `progress` receives the fraction done after each entry.
pub fn scan_panels(
    decoder: &dyn PanelDecoder,
    archive_id: u64,
    archive: &Path,
    progress: &mut dyn FnMut(f32),
) -> Result<Vec<Panel>, LoadError> {
    let start = Instant::now();
    let entries = decoder.list_entries(archive)?;
    let total = entries.len();
    let mut panels = Vec::with_capacity(total);
    for (i, entry) in entries.into_iter().enumerate() {
        match decoder.measure_aspect_ratio(archive, &entry) {
            Ok(aspect_ratio) => panels.push(Panel {
                archive_id,
                index: panels.len(),
                entry_name: entry,
                aspect_ratio,
            }),
            Err(e) => warn!("scan: skipping {entry}: {e}"),
        }
        progress((i + 1) as f32 / total as f32);
    }
    if total == 0 {
        progress(1.0);
    }
    info!(
        "scan: {} measured {}/{total} panels in {:.1}ms",
        archive.display(),
        panels.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(panels)
}

/// Rate limiter for scan progress: at most one update per interval, but
/// the final 1.0 always goes through.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_emit(&mut self, progress: f32, now: Instant) -> bool {
        let due = self
            .last
            .is_none_or(|t| now.saturating_duration_since(t) >= self.interval);
        if due || progress >= 1.0 {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub enum ScanEvent {
    Progress(f32),
    Done(Result<Vec<Panel>, LoadError>),
}

/// A scan running on its own thread.
pub struct ScanHandle {
    events: mpsc::Receiver<ScanEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ScanHandle {
    /// Block until the scan finishes, forwarding progress to `on_progress`.
    pub fn wait(mut self, mut on_progress: impl FnMut(f32)) -> Result<Vec<Panel>> {
        let mut result = None;
        for event in self.events.iter() {
            match event {
                ScanEvent::Progress(p) => on_progress(p),
                ScanEvent::Done(r) => {
                    result = Some(r);
                    break;
                }
            }
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        match result {
            Some(r) => Ok(r?),
            None => anyhow::bail!("scan thread exited without a result"),
        }
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Run `scan_panels` in the background, streaming throttled progress.
pub fn spawn_scan(
    decoder: Arc<dyn PanelDecoder>,
    archive_id: u64,
    archive: PathBuf,
    interval: Duration,
) -> Result<ScanHandle> {
    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
        .name(format!("panel-scan-{archive_id}"))
        .spawn(move || {
            let mut throttle = ProgressThrottle::new(interval);
            let progress_tx = tx.clone();
            let result = scan_panels(decoder.as_ref(), archive_id, &archive, &mut |p| {
                if throttle.should_emit(p, Instant::now()) {
                    let _ = progress_tx.send(ScanEvent::Progress(p));
                }
            });
            let _ = tx.send(ScanEvent::Done(result));
        })
        .context("failed to spawn scan thread")?;
    Ok(ScanHandle {
        events: rx,
        thread: Some(thread),
    })
}
