//! Folder watcher — monitors a library folder for archive changes via
//! notify (inotify on Linux).
//!
//! notify::RecommendedWatcher runs callbacks on an internal thread.
//! FolderWatcher bridges change notifications to the caller via mpsc::channel.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, trace};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::archive::is_manga_file;

pub struct FolderWatcher {
    rx: mpsc::Receiver<PathBuf>,
    _watcher: RecommendedWatcher, // Drop stops watching
}

impl FolderWatcher {
    /// Watch `dir` (non-recursive) for manga archives being created,
    /// removed, renamed or rewritten.
    pub fn new(dir: &Path) -> Result<Self> {
        let canonical = dir.canonicalize()?;
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !relevant(&event.kind) {
                    return;
                }
                for path in event.paths {
                    let is_archive = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(is_manga_file);
                    if is_archive {
                        trace!("watch: {:?} {}", event.kind, path.display());
                        let _ = tx.send(path);
                    }
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
        debug!("watch: watching {}", canonical.display());

        Ok(Self { rx, _watcher: watcher })
    }

    /// Block up to `timeout` for a change, then collapse any burst that
    /// follows within `settle`.
    pub fn wait_for_change(&self, timeout: Duration, settle: Duration) -> bool {
        if self.rx.recv_timeout(timeout).is_err() {
            return false;
        }
        while self.rx.recv_timeout(settle).is_ok() {}
        true
    }
}

fn relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn only_content_changes_are_relevant() {
        assert!(relevant(&EventKind::Create(CreateKind::File)));
        assert!(relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(!relevant(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn missing_folder_is_an_error() {
        assert!(FolderWatcher::new(Path::new("/nonexistent/panelreel/library")).is_err());
    }
}
