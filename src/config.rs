use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// ConfigFile — deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub width: Option<f32>,
    pub viewport_height: Option<f32>,
    #[serde(default)]
    pub reader: ReaderConfigFile,
    #[serde(default)]
    pub gesture: GestureConfigFile,
    #[serde(default)]
    pub progress: ProgressConfigFile,
    #[serde(default)]
    pub library: LibraryConfigFile,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ReaderConfigFile {
    pub spacing: Option<f32>,
    pub pool_capacity: Option<usize>,
    pub prefetch_distance: Option<usize>,
    pub decode_workers: Option<usize>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct GestureConfigFile {
    pub touch_slop: Option<f32>,
    pub min_fling_velocity: Option<f32>,
    pub max_fling_velocity: Option<f32>,
    pub fling_friction: Option<f32>,
    pub ppi: Option<f32>,
    pub double_tap_scale: Option<f32>,
    pub min_scale: Option<f32>,
    pub max_scale: Option<f32>,
    pub zoom_duration_ms: Option<u64>,
    pub double_tap_timeout_ms: Option<u64>,
    pub long_press_timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ProgressConfigFile {
    pub min_delta: Option<f32>,
    pub debounce_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LibraryConfigFile {
    pub path: Option<PathBuf>,
    pub covers_dir: Option<PathBuf>,
    pub scan_progress_interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Config — resolved (all fields concrete)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Scroll container width in pixels; panel heights derive from it.
    pub width: f32,
    pub viewport_height: f32,
    pub reader: ReaderConfig,
    pub gesture: GestureConfig,
    pub progress: ProgressConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub spacing: f32,
    pub pool_capacity: usize,
    pub prefetch_distance: usize,
    pub decode_workers: usize,
}

#[derive(Debug, Clone)]
pub struct GestureConfig {
    pub touch_slop: f32,
    pub min_fling_velocity: f32,
    pub max_fling_velocity: f32,
    pub fling_friction: f32,
    pub ppi: f32,
    pub double_tap_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub zoom_duration: Duration,
    pub double_tap_timeout: Duration,
    pub long_press_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub min_delta: f32,
    pub debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub path: PathBuf,
    pub covers_dir: PathBuf,
    pub scan_progress_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            spacing: 8.0,
            pool_capacity: 5,
            prefetch_distance: 2,
            decode_workers: 2,
        }
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            touch_slop: 8.0,
            min_fling_velocity: 50.0,
            max_fling_velocity: 8000.0,
            fling_friction: 0.015,
            ppi: 160.0,
            double_tap_scale: 2.0,
            min_scale: 1.0,
            max_scale: 8.0,
            zoom_duration: Duration::from_millis(200),
            double_tap_timeout: Duration::from_millis(300),
            long_press_timeout: Duration::from_millis(500),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_delta: 50.0,
            debounce: Duration::from_millis(500),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().resolve()
    }
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(
        &mut self,
        width: Option<f32>,
        library: Option<PathBuf>,
        pool_capacity: Option<usize>,
        prefetch_distance: Option<usize>,
    ) {
        if let Some(v) = width {
            debug!("config: CLI override width={v}");
            self.width = width;
        }
        if let Some(ref v) = library {
            debug!("config: CLI override library={}", v.display());
            self.library.path = library;
        }
        if let Some(v) = pool_capacity {
            debug!("config: CLI override pool_capacity={v}");
            self.reader.pool_capacity = pool_capacity;
        }
        if let Some(v) = prefetch_distance {
            debug!("config: CLI override prefetch_distance={v}");
            self.reader.prefetch_distance = prefetch_distance;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> Config {
        let r = ReaderConfig::default();
        let g = GestureConfig::default();
        let p = ProgressConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_millis);

        let library_path = self
            .library
            .path
            .unwrap_or_else(|| data_dir().join("library.toml"));
        let covers_dir = self
            .library
            .covers_dir
            .unwrap_or_else(|| default_covers_dir(&library_path));

        let config = Config {
            width: self.width.unwrap_or(720.0),
            viewport_height: self.viewport_height.unwrap_or(1280.0),
            reader: ReaderConfig {
                spacing: self.reader.spacing.unwrap_or(r.spacing),
                pool_capacity: self.reader.pool_capacity.unwrap_or(r.pool_capacity).max(1),
                prefetch_distance: self.reader.prefetch_distance.unwrap_or(r.prefetch_distance),
                decode_workers: self.reader.decode_workers.unwrap_or(r.decode_workers).max(1),
            },
            gesture: GestureConfig {
                touch_slop: self.gesture.touch_slop.unwrap_or(g.touch_slop),
                min_fling_velocity: self.gesture.min_fling_velocity.unwrap_or(g.min_fling_velocity),
                max_fling_velocity: self.gesture.max_fling_velocity.unwrap_or(g.max_fling_velocity),
                fling_friction: self.gesture.fling_friction.unwrap_or(g.fling_friction),
                ppi: self.gesture.ppi.unwrap_or(g.ppi),
                double_tap_scale: self.gesture.double_tap_scale.unwrap_or(g.double_tap_scale),
                min_scale: self.gesture.min_scale.unwrap_or(g.min_scale),
                max_scale: self.gesture.max_scale.unwrap_or(g.max_scale),
                zoom_duration: ms(self.gesture.zoom_duration_ms, g.zoom_duration),
                double_tap_timeout: ms(self.gesture.double_tap_timeout_ms, g.double_tap_timeout),
                long_press_timeout: ms(self.gesture.long_press_timeout_ms, g.long_press_timeout),
            },
            progress: ProgressConfig {
                min_delta: self.progress.min_delta.unwrap_or(p.min_delta),
                debounce: ms(self.progress.debounce_ms, p.debounce),
            },
            library: LibraryConfig {
                path: library_path,
                covers_dir,
                scan_progress_interval: ms(
                    self.library.scan_progress_interval_ms,
                    Duration::from_millis(300),
                ),
            },
        };
        info!(
            "config: resolved width={}, viewport_height={}, spacing={}, pool_capacity={}, \
             prefetch_distance={}, decode_workers={}, ppi={}, scale={}..{}, \
             progress_debounce={}ms, library={}",
            config.width,
            config.viewport_height,
            config.reader.spacing,
            config.reader.pool_capacity,
            config.reader.prefetch_distance,
            config.reader.decode_workers,
            config.gesture.ppi,
            config.gesture.min_scale,
            config.gesture.max_scale,
            config.progress.debounce.as_millis(),
            config.library.path.display(),
        );
        config
    }
}

/// `covers/` next to the library file.
pub fn default_covers_dir(library_path: &Path) -> PathBuf {
    library_path
        .parent()
        .map_or_else(|| PathBuf::from("covers"), |p| p.join("covers"))
}

/// `$XDG_DATA_HOME/panelreel`, `~/.local/share/panelreel`, or the current
/// directory when neither is set.
fn data_dir() -> PathBuf {
    xdg_base("XDG_DATA_HOME", &[".local", "share"])
        .map_or_else(|| PathBuf::from("."), |d| d.join("panelreel"))
}

/// `$XDG_CONFIG_HOME/panelreel/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    xdg_base("XDG_CONFIG_HOME", &[".config"]).map(|d| d.join("panelreel").join("config.toml"))
}

/// `$var`, or `$HOME` joined with `home_suffix`.
fn xdg_base(var: &str, home_suffix: &[&str]) -> Option<PathBuf> {
    std::env::var_os(var).map(PathBuf::from).or_else(|| {
        let home = PathBuf::from(std::env::var_os("HOME")?);
        Some(home_suffix.iter().fold(home, |p, s| p.join(s)))
    })
}

/// Load the config from its default location; see [`load_config_from`].
pub fn load_config() -> Result<ConfigFile> {
    match default_config_path() {
        Some(path) => load_config_from(&path),
        None => {
            info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
            Ok(ConfigFile::default())
        }
    }
}

/// Read a config file. A missing file yields `ConfigFile::default()`; an
/// unreadable or malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let cfg: ConfigFile = toml::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            info!("config: loaded from {}", path.display());
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.width, 720.0);
        assert_eq!(resolved.reader.spacing, 8.0);
        assert_eq!(resolved.reader.pool_capacity, 5);
        assert_eq!(resolved.reader.prefetch_distance, 2);
        assert_eq!(resolved.gesture.double_tap_scale, 2.0);
        assert_eq!(resolved.gesture.zoom_duration, Duration::from_millis(200));
        assert_eq!(resolved.progress.min_delta, 50.0);
        assert_eq!(resolved.library.scan_progress_interval, Duration::from_millis(300));
    }

    #[test]
    fn partial_toml() {
        let text = r#"
            width = 1080.0
            [reader]
            pool_capacity = 7
            [gesture]
            max_scale = 4.0
            long_press_timeout_ms = 800
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.width, 1080.0);
        assert_eq!(resolved.reader.pool_capacity, 7);
        assert_eq!(resolved.gesture.max_scale, 4.0);
        assert_eq!(resolved.gesture.long_press_timeout, Duration::from_millis(800));
        // Defaults for unspecified fields
        assert_eq!(resolved.reader.prefetch_distance, 2);
        assert_eq!(resolved.gesture.min_scale, 1.0);
        assert_eq!(resolved.progress.debounce, Duration::from_millis(500));
    }

    #[test]
    fn invalid_toml() {
        let text = "this is not valid toml [[[";
        let result = toml::from_str::<ConfigFile>(text);
        assert!(result.is_err());
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_config_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg.resolve().width, 720.0);
    }

    #[test]
    fn load_from_file_reads_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "width = 480.0\n[reader]\nspacing = 4.0\n").unwrap();
        let resolved = load_config_from(&path).unwrap().resolve();
        assert_eq!(resolved.width, 480.0);
        assert_eq!(resolved.reader.spacing, 4.0);
    }

    #[test]
    fn load_from_malformed_file_names_the_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "width = [[[").unwrap();
        let err = load_config_from(&path).err().unwrap();
        assert!(format!("{err:#}").contains(&path.display().to_string()));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cfg: ConfigFile = toml::from_str("[reader]\npool_capacity = 0\ndecode_workers = 0").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.reader.pool_capacity, 1);
        assert_eq!(resolved.reader.decode_workers, 1);
    }

    #[test]
    fn covers_default_next_to_library() {
        let cfg: ConfigFile = toml::from_str("[library]\npath = \"/srv/manga/library.toml\"").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.library.covers_dir, PathBuf::from("/srv/manga/covers"));
    }

    #[test]
    fn cli_overrides() {
        let mut cfg: ConfigFile = toml::from_str("width = 500.0\n[reader]\nprefetch_distance = 1").unwrap();
        cfg.merge_cli(Some(640.0), Some(PathBuf::from("/tmp/lib.toml")), Some(9), None);
        let resolved = cfg.resolve();
        assert_eq!(resolved.width, 640.0); // CLI wins
        assert_eq!(resolved.reader.pool_capacity, 9);
        assert_eq!(resolved.reader.prefetch_distance, 1); // config, no CLI value
        assert_eq!(resolved.library.path, PathBuf::from("/tmp/lib.toml"));
        assert_eq!(resolved.library.covers_dir, PathBuf::from("/tmp/covers"));
    }
}
