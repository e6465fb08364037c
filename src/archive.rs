//! Archive access: list, read and decode page images inside zip/cbz files.
//!
//! `PanelDecoder` is the seam the reader core depends on; `ZipDecoder` is
//! the real implementation. Every call opens the archive afresh, so a file
//! that moves or disappears mid-session surfaces as a per-panel
//! `LoadError::ArchiveUnavailable` instead of a stale handle.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use log::{debug, trace};
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::natsort::sort_natural;

/// A decoded page image.
pub type PanelImage = DynamicImage;

const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];
const MANGA_EXTENSIONS: [&str; 2] = [".zip", ".cbz"];
/// Largest page entry read into memory. Archive headers are not trusted
/// for more than this.
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Per-panel failure. Never fatal to a reading session.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("archive unavailable: {}", path.display())]
    ArchiveUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable archive {}: {source}", path.display())]
    BadArchive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("entry '{entry}' not found in {}", path.display())]
    EntryMissing { path: PathBuf, entry: String },
    #[error("corrupt image '{entry}': {source}")]
    Corrupt {
        entry: String,
        #[source]
        source: image::ImageError,
    },
    #[error("entry '{entry}' is larger than {MAX_ENTRY_BYTES} bytes ({size} bytes)")]
    TooLarge { entry: String, size: u64 },
    #[error("image '{entry}' has zero size")]
    EmptyImage { entry: String },
    #[error("failed to read '{entry}': {source}")]
    Io {
        entry: String,
        #[source]
        source: std::io::Error,
    },
}

/// Case-insensitive check against the supported page image extensions.
pub fn is_image_file(name: &str) -> bool {
    has_extension(name, &IMAGE_EXTENSIONS)
}

/// Case-insensitive check for zip/cbz archives.
pub fn is_manga_file(name: &str) -> bool {
    has_extension(name, &MANGA_EXTENSIONS)
}

fn has_extension(name: &str, exts: &[&str]) -> bool {
    let lower = name.to_ascii_lowercase();
    exts.iter().any(|ext| lower.ends_with(ext))
}

/// Source of page images for the reader and the library scanner.
///
/// Implementations must be shareable across decode worker threads.
pub trait PanelDecoder: Send + Sync {
    /// Image entry names in natural order (directories and non-images
    /// excluded).
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>, LoadError>;

    /// Raw bytes of one entry.
    fn read_entry(&self, archive: &Path, entry: &str) -> Result<Vec<u8>, LoadError>;

    /// Decode one entry into an image.
    fn decode_entry(&self, archive: &Path, entry: &str) -> Result<PanelImage, LoadError> {
        let bytes = self.read_entry(archive, entry)?;
        image::load_from_memory(&bytes).map_err(|source| LoadError::Corrupt {
            entry: entry.to_string(),
            source,
        })
    }

    /// Width / height of one entry, reading only the image header.
    fn measure_aspect_ratio(&self, archive: &Path, entry: &str) -> Result<f32, LoadError> {
        let bytes = self.read_entry(archive, entry)?;
        let corrupt = |source| LoadError::Corrupt {
            entry: entry.to_string(),
            source,
        };
        let (w, h) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|source| LoadError::Io {
                entry: entry.to_string(),
                source,
            })?
            .into_dimensions()
            .map_err(corrupt)?;
        if w == 0 || h == 0 {
            return Err(LoadError::EmptyImage {
                entry: entry.to_string(),
            });
        }
        trace!("measure {entry}: {w}x{h}");
        Ok(w as f32 / h as f32)
    }
}

/// Reads pages straight out of zip/cbz archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipDecoder;

impl ZipDecoder {
    fn open(archive: &Path) -> Result<ZipArchive<BufReader<File>>, LoadError> {
        let file = File::open(archive).map_err(|source| LoadError::ArchiveUnavailable {
            path: archive.to_path_buf(),
            source,
        })?;
        ZipArchive::new(BufReader::new(file)).map_err(|source| LoadError::BadArchive {
            path: archive.to_path_buf(),
            source,
        })
    }
}

impl PanelDecoder for ZipDecoder {
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>, LoadError> {
        let zip = Self::open(archive)?;
        let mut names: Vec<String> = zip
            .file_names()
            .filter(|n| !n.ends_with('/') && is_image_file(n))
            .map(str::to_string)
            .collect();
        sort_natural(&mut names);
        debug!("archive {}: {} image entries", archive.display(), names.len());
        Ok(names)
    }

    fn read_entry(&self, archive: &Path, entry: &str) -> Result<Vec<u8>, LoadError> {
        let mut zip = Self::open(archive)?;
        let mut file = zip.by_name(entry).map_err(|e| match e {
            ZipError::FileNotFound => LoadError::EntryMissing {
                path: archive.to_path_buf(),
                entry: entry.to_string(),
            },
            other => LoadError::BadArchive {
                path: archive.to_path_buf(),
                source: other,
            },
        })?;
        let too_large = |size| LoadError::TooLarge {
            entry: entry.to_string(),
            size,
        };
        if file.size() > MAX_ENTRY_BYTES {
            return Err(too_large(file.size()));
        }
        let mut buf = Vec::with_capacity(file.size() as usize);
        // The declared size may also understate the real data.
        (&mut file)
            .take(MAX_ENTRY_BYTES + 1)
            .read_to_end(&mut buf)
            .map_err(|source| LoadError::Io {
                entry: entry.to_string(),
                source,
            })?;
        if buf.len() as u64 > MAX_ENTRY_BYTES {
            return Err(too_large(buf.len() as u64));
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions() {
        assert!(is_image_file("001.jpg"));
        assert!(is_image_file("ch1/P002.JPEG"));
        assert!(is_image_file("x.webp"));
        assert!(is_image_file("x.PNG"));
        assert!(!is_image_file("info.txt"));
        assert!(!is_image_file("ch1/"));
    }

    #[test]
    fn manga_extensions() {
        assert!(is_manga_file("One.cbz"));
        assert!(is_manga_file("two.ZIP"));
        assert!(!is_manga_file("three.rar"));
        assert!(!is_manga_file("cbz"));
    }

    #[test]
    fn missing_archive_is_unavailable() {
        let err = ZipDecoder
            .list_entries(Path::new("/nonexistent/panelreel/missing.cbz"))
            .unwrap_err();
        assert!(matches!(err, LoadError::ArchiveUnavailable { .. }), "{err}");
    }
}
