use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use panelreel::archive::{PanelDecoder, ZipDecoder};
use panelreel::config::{self, Config};
use panelreel::gesture::GestureEvent;
use panelreel::layout::OffsetIndex;
use panelreel::library::{self, LibraryFile, MangaFile};
use panelreel::progress::{ProgressStore, ReadingPosition};
use panelreel::render::{compose_viewport, encode_png};
use panelreel::session::ReaderSession;
use panelreel::watch::FolderWatcher;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PANELREEL_BUILD_GIT_HASH"),
    " ",
    env!("PANELREEL_BUILD_PROFILE"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "panelreel",
    version = VERSION,
    about = "Continuous-scroll manga reader engine for zip/cbz archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Scroll container width in pixels
    #[arg(long, global = true)]
    width: Option<f32>,

    /// Library file (default: $XDG_DATA_HOME/panelreel/library.toml)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Surface pool capacity
    #[arg(long, global = true)]
    pool: Option<usize>,

    /// Panels to keep decoded behind the center panel
    #[arg(long, global = true)]
    prefetch: Option<usize>,

    /// Log output file path
    #[arg(long, global = true)]
    log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Add new archives in a folder to the library and measure their panels
    Sync {
        folder: PathBuf,

        /// Keep running and re-sync when archives change
        #[arg(long)]
        watch: bool,
    },
    /// Print the panel layout of an archive
    Panels { archive: PathBuf },
    /// Render one viewport of an archive to PNG
    Render {
        archive: PathBuf,

        /// Output PNG file
        #[arg(short, long, default_value = "viewport.png")]
        output: PathBuf,

        /// Scroll offset in content pixels
        #[arg(long, conflicts_with = "page")]
        offset: Option<f32>,

        /// Panel to scroll to
        #[arg(long)]
        page: Option<usize>,

        /// Zoom factor, applied with a pinch about the viewport center
        #[arg(long)]
        zoom: Option<f32>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        match fs::File::create(log_path) {
            Ok(file) => env_logger::Builder::from_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init(),
            Err(e) => {
                eprintln!("Error: failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        }
    } else {
        env_logger::init();
    }

    // Load config file and merge CLI overrides
    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    cfg.merge_cli(cli.width, cli.library, cli.pool, cli.prefetch);
    let config = cfg.resolve();

    let result = match cli.command {
        Command::Sync { folder, watch } => cmd_sync(&folder, watch, &config),
        Command::Panels { archive } => cmd_panels(&archive, &config),
        Command::Render {
            archive,
            output,
            offset,
            page,
            zoom,
        } => cmd_render(&archive, &output, offset, page, zoom, &config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

fn cmd_sync(folder: &Path, watch: bool, config: &Config) -> Result<()> {
    let folder = &folder
        .canonicalize()
        .with_context(|| format!("failed to open {}", folder.display()))?;
    let decoder: Arc<dyn PanelDecoder> = Arc::new(ZipDecoder);
    let mut lib = LibraryFile::open(&config.library.path)?;
    sync_once(folder, &decoder, &mut lib, config)?;
    if !watch {
        return Ok(());
    }

    let watcher = FolderWatcher::new(folder)?;
    eprintln!("watching {} (Ctrl-C to stop)", folder.display());
    loop {
        if watcher.wait_for_change(Duration::from_secs(3600), Duration::from_millis(300)) {
            info!("sync: change detected in {}", folder.display());
            sync_once(folder, &decoder, &mut lib, config)?;
        }
    }
}

fn sync_once(
    folder: &Path,
    decoder: &Arc<dyn PanelDecoder>,
    lib: &mut LibraryFile,
    config: &Config,
) -> Result<()> {
    let report = library::sync_folder(
        folder,
        &config.library.covers_dir,
        decoder.as_ref(),
        lib.library_mut(),
    )?;
    for (path, err) in &report.failed {
        eprintln!("warning: {}: {err}", path.display());
    }

    let unscanned: Vec<(u64, PathBuf, String)> = lib
        .library()
        .files()
        .iter()
        .filter(|m| !m.is_scanned() && m.path.parent() == Some(folder))
        .map(|m| (m.id, m.path.clone(), m.name.clone()))
        .collect();
    for (id, path, name) in unscanned {
        let panels = scan_with_progress(decoder, id, &path, &name, config)?;
        lib.library_mut().set_panels(id, panels);
    }
    lib.save()?;
    eprintln!(
        "{} added, {} refreshed, {} kept, {} removed ({} in library)",
        report.added.len(),
        report.refreshed.len(),
        report.kept,
        report.pruned.len(),
        lib.library().files().len()
    );
    Ok(())
}

fn scan_with_progress(
    decoder: &Arc<dyn PanelDecoder>,
    id: u64,
    path: &Path,
    name: &str,
    config: &Config,
) -> Result<Vec<library::Panel>> {
    let handle = library::spawn_scan(
        Arc::clone(decoder),
        id,
        path.to_path_buf(),
        config.library.scan_progress_interval,
    )?;
    let panels = handle
        .wait(|p| eprint!("\rscanning {name}: {:>3.0}%", p * 100.0))
        .with_context(|| format!("failed to scan {}", path.display()))?;
    eprintln!();
    Ok(panels)
}

// ---------------------------------------------------------------------------
// panels
// ---------------------------------------------------------------------------

fn cmd_panels(archive: &Path, config: &Config) -> Result<()> {
    let decoder = ZipDecoder;
    let panels = library::scan_panels(&decoder, 0, archive, &mut |_| {})
        .with_context(|| format!("failed to read {}", archive.display()))?;
    let ratios: Vec<f32> = panels.iter().map(|p| p.aspect_ratio).collect();
    let index = OffsetIndex::build(&ratios, config.width, config.reader.spacing);

    println!("{:>5}  {:>8}  {:>9}  {:>9}  entry", "index", "aspect", "offset", "height");
    for (panel, entry) in panels.iter().zip(index.entries()) {
        println!(
            "{:>5}  {:>8.4}  {:>9.1}  {:>9.1}  {}",
            panel.index, panel.aspect_ratio, entry.offset, entry.height, panel.entry_name
        );
    }
    println!(
        "{} panels, total height {:.1}px at width {}",
        index.len(),
        index.total_height(),
        config.width
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

/// Rendering a viewport must not move the saved reading position.
struct DiscardProgress;

impl ProgressStore for DiscardProgress {
    fn write(&mut self, _archive_id: u64, _position: ReadingPosition) -> Result<()> {
        Ok(())
    }
}

fn cmd_render(
    archive: &Path,
    output: &Path,
    offset: Option<f32>,
    page: Option<usize>,
    zoom: Option<f32>,
    config: &Config,
) -> Result<()> {
    let pipeline_start = Instant::now();
    let decoder: Arc<dyn PanelDecoder> = Arc::new(ZipDecoder);
    let manga = library_entry(archive, &decoder, config)?;
    if manga.panels.is_empty() {
        anyhow::bail!("{} has no readable panels", archive.display());
    }

    let now = Instant::now();
    let mut session = ReaderSession::open(&manga, decoder, DiscardProgress, config, now)?;
    match (offset, page) {
        (Some(o), _) => session.scroll_to(o, now),
        (None, Some(p)) => session.jump_to_page(p, now),
        (None, None) => {}
    }
    if let Some(z) = zoom {
        pinch_zoom(&mut session, z, now);
    }

    if !session.wait_idle(Duration::from_secs(30)) {
        eprintln!("warning: some panels did not finish decoding");
    }
    let (w, h) = session.viewport();
    let image = compose_viewport(&session.visible_surfaces(), session.state(), w as u32, h as u32);
    let png = encode_png(image)?;
    fs::write(output, &png).with_context(|| format!("failed to write {}", output.display()))?;

    let failed = session.failed().len();
    let center = session.center().unwrap_or(0);
    session.close();
    eprintln!(
        "wrote {} ({} bytes, center panel {center}, {failed} failed)",
        output.display(),
        png.len()
    );
    info!(
        "render: done in {:.1}ms",
        pipeline_start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Look up `archive` in the library, syncing its folder and measuring its
/// panels first when needed.
fn library_entry(archive: &Path, decoder: &Arc<dyn PanelDecoder>, config: &Config) -> Result<MangaFile> {
    let archive = archive
        .canonicalize()
        .with_context(|| format!("failed to open {}", archive.display()))?;
    let mut lib = LibraryFile::open(&config.library.path)?;
    if lib.library().find_by_path(&archive).is_none() {
        let folder = archive
            .parent()
            .ok_or_else(|| anyhow::anyhow!("{} has no parent folder", archive.display()))?;
        library::sync_folder(folder, &config.library.covers_dir, decoder.as_ref(), lib.library_mut())?;
    }
    let manga = lib
        .library()
        .find_by_path(&archive)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} contains no images", archive.display()))?;
    if manga.is_scanned() {
        return Ok(manga);
    }

    let panels = scan_with_progress(decoder, manga.id, &manga.path, &manga.name, config)?;
    lib.library_mut().set_panels(manga.id, panels.clone());
    lib.save()?;
    Ok(MangaFile { panels, ..manga })
}

fn pinch_zoom<S: ProgressStore>(session: &mut ReaderSession<S>, zoom: f32, now: Instant) {
    let (w, h) = session.viewport();
    let (focus_x, focus_y) = (w / 2.0, h / 2.0);
    let span = 100.0;
    session.handle_gesture(GestureEvent::PinchBegin { focus_x, focus_y, span }, now);
    session.handle_gesture(
        GestureEvent::Pinch {
            focus_x,
            focus_y,
            span: span * zoom,
        },
        now,
    );
    session.handle_gesture(GestureEvent::PinchEnd, now);
    // Let a below-minimum pinch finish animating back.
    session.tick(now + Duration::from_secs(1));
}
