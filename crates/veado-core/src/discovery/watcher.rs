use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// Forwards names of files touched in the instances directory.
///
/// The watch stops when this value is dropped.
pub struct DiscoveryWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DiscoveryWatcher {
    /// Start watching `dir`. Every create, modify (including renames) and
    /// remove notification sends the affected file name on `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstancesDirNotFound`] if `dir` is not a directory, or
    /// a watcher error if the platform backend cannot be started.
    pub fn spawn(dir: &Path, tx: mpsc::UnboundedSender<String>) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::InstancesDirNotFound(dir.to_path_buf()));
        }

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
                Ok(event) => match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                        for path in &event.paths {
                            let Some(name) = path.file_name() else {
                                continue;
                            };
                            let name = name.to_string_lossy().into_owned();
                            debug!("Instance file event {:?} for {}", event.kind, name);
                            if tx.send(name).is_err() {
                                return;
                            }
                        }
                    }
                    _ => {}
                },
                Err(e) => error!("Watcher error: {}", e),
            })?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!("Watching instances directory: {:?}", dir);

        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for DiscoveryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
