//! Run workspace: the scoped directory tree holding intermediate files.
//!
//! ```text
//! djvu_temp_XXXXXX/
//!   page-0001/   single page: page.pnm, page.djvu
//!   page-0002/   dual page: foreground.pbm, foreground.rle, background.pnm,
//!                separated.sep, page.djvu
//! ```
//!
//! Every page directory exists before the first job starts and each worker
//! writes only into its own, so the tree needs no locking. The tree is torn
//! down by [`RunWorkspace::finish`] after the merge has read the artifacts,
//! or by `Drop` if the run unwinds early.

use crate::config::AssemblyConfig;
use crate::error::TailorError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const TEMP_PREFIX: &str = "djvu_temp_";

/// Directory tree scoped to one run.
#[derive(Debug)]
pub struct RunWorkspace {
    root: Option<TempDir>,
    path: PathBuf,
    page_dirs: BTreeMap<usize, PathBuf>,
    keep: bool,
}

impl RunWorkspace {
    /// Create the workspace and one subdirectory per page index `1..=pages`.
    ///
    /// The root is always a fresh `djvu_temp_*` directory. With
    /// `config.temp_dir` set it is created inside that base directory, which
    /// may hold other files and is never removed. A base that is not a
    /// directory, or cannot be created or written, is a
    /// [`TailorError::WorkspaceConflict`].
    pub fn create(config: &AssemblyConfig, pages: usize) -> Result<Self, TailorError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let root = match config.temp_dir {
            Some(ref base) => {
                prepare_base(base)?;
                builder
                    .tempdir_in(base)
                    .map_err(|e| TailorError::WorkspaceConflict {
                        path: base.clone(),
                        reason: format!("not writable: {}", e),
                    })?
            }
            None => builder
                .tempdir()
                .map_err(|e| TailorError::io("Failed to create temporary workspace", e))?,
        };

        let mut ws = Self {
            path: root.path().to_path_buf(),
            root: Some(root),
            page_dirs: BTreeMap::new(),
            keep: config.keep_temp,
        };

        for index in 1..=pages {
            let dir = ws.path.join(format!("page-{index:04}"));
            std::fs::create_dir(&dir).map_err(|e| {
                TailorError::io(format!("Failed to create page directory {}", dir.display()), e)
            })?;
            ws.page_dirs.insert(index, dir);
        }

        info!("Using temporary folder: {}", ws.path.display());
        Ok(ws)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Private directory of page `index`, if it belongs to this run.
    pub fn page_dir(&self, index: usize) -> Option<&Path> {
        self.page_dirs.get(&index).map(PathBuf::as_path)
    }

    /// End the run: delete the tree, or keep it when configured to.
    ///
    /// Returns the retained path, if any. Must only be called once no worker
    /// can still write and the merge has finished reading.
    pub fn finish(mut self) -> Result<Option<PathBuf>, TailorError> {
        if self.keep {
            if let Some(t) = self.root.take() {
                let _ = t.keep();
            }
            info!("Keeping temporary folder: {}", self.path.display());
            return Ok(Some(self.path.clone()));
        }
        debug!("Cleaning up temporary folder {}", self.path.display());
        self.cleanup()
            .map_err(|e| TailorError::io(format!("Failed to remove {}", self.path.display()), e))?;
        Ok(None)
    }

    fn cleanup(&mut self) -> std::io::Result<()> {
        match self.root.take() {
            Some(t) => t.close(),
            None => Ok(()),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if self.keep || self.root.is_none() {
            return;
        }
        if let Err(e) = self.cleanup() {
            warn!("Failed to clean up {}: {}", self.path.display(), e);
        }
    }
}

/// Make sure `base` exists as a directory.
fn prepare_base(base: &Path) -> Result<(), TailorError> {
    let conflict = |reason: String| TailorError::WorkspaceConflict {
        path: base.to_path_buf(),
        reason,
    };
    if !base.exists() {
        std::fs::create_dir_all(base).map_err(|e| conflict(format!("cannot create: {}", e)))?;
    } else if !base.is_dir() {
        return Err(conflict("not a directory".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(temp: Option<&Path>, keep: bool) -> AssemblyConfig {
        let mut b = AssemblyConfig::builder().keep_temp(keep);
        if let Some(t) = temp {
            b = b.temp_dir(t);
        }
        b.build().unwrap()
    }

    fn is_run_root(path: &Path) -> bool {
        path.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX)
    }

    #[test]
    fn managed_workspace_has_page_dirs_and_is_removed() {
        let ws = RunWorkspace::create(&config_with(None, false), 3).unwrap();
        let root = ws.path().to_path_buf();
        assert!(is_run_root(&root));
        for i in 1..=3 {
            assert!(ws.page_dir(i).unwrap().is_dir());
        }
        assert!(ws.page_dir(4).is_none());
        assert_eq!(ws.finish().unwrap(), None);
        assert!(!root.exists());
    }

    #[test]
    fn keep_temp_retains_tree() {
        let base = TempDir::new().unwrap();
        let ws = RunWorkspace::create(&config_with(Some(base.path()), true), 1).unwrap();
        let root = ws.path().to_path_buf();
        let kept = ws.finish().unwrap();
        assert_eq!(kept.as_deref(), Some(root.as_path()));
        assert!(root.join("page-0001").is_dir());
        assert_eq!(root.parent(), Some(base.path()));
    }

    #[test]
    fn drop_without_finish_cleans_up() {
        let base = TempDir::new().unwrap();
        let target = base.path().join("work");
        let root = {
            let ws = RunWorkspace::create(&config_with(Some(&target), false), 2).unwrap();
            assert!(ws.page_dir(2).unwrap().is_dir());
            ws.path().to_path_buf()
        };
        assert!(!root.exists());
        assert!(target.is_dir());
    }

    #[test]
    fn base_directory_is_created_when_absent() {
        let base = TempDir::new().unwrap();
        let target = base.path().join("nested/work");
        let ws = RunWorkspace::create(&config_with(Some(&target), false), 1).unwrap();
        assert_eq!(ws.path().parent(), Some(target.as_path()));
        assert!(is_run_root(ws.path()));
        ws.finish().unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn non_empty_base_is_shared_and_left_intact() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("leftover.djvu"), b"x").unwrap();
        std::fs::create_dir(base.path().join("other-run")).unwrap();

        let ws = RunWorkspace::create(&config_with(Some(base.path()), false), 2).unwrap();
        let root = ws.path().to_path_buf();
        assert_eq!(root.parent(), Some(base.path()));
        ws.finish().unwrap();

        assert!(!root.exists());
        assert_eq!(std::fs::read(base.path().join("leftover.djvu")).unwrap(), b"x");
        assert!(base.path().join("other-run").is_dir());
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 2);
    }

    #[test]
    fn concurrent_runs_share_a_base() {
        let base = TempDir::new().unwrap();
        let a = RunWorkspace::create(&config_with(Some(base.path()), false), 1).unwrap();
        let b = RunWorkspace::create(&config_with(Some(base.path()), false), 1).unwrap();
        assert_ne!(a.path(), b.path());
        a.finish().unwrap();
        assert!(b.page_dir(1).unwrap().is_dir());
        b.finish().unwrap();
    }

    #[test]
    fn file_as_base_conflicts() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let err = RunWorkspace::create(&config_with(Some(&file), false), 1).unwrap_err();
        assert!(matches!(err, TailorError::WorkspaceConflict { .. }));
        assert_eq!(std::fs::read(&file).unwrap(), b"x");
    }

    #[test]
    fn base_under_a_file_conflicts() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("blocker");
        std::fs::write(&file, b"x").unwrap();
        let err =
            RunWorkspace::create(&config_with(Some(&file.join("work")), false), 1).unwrap_err();
        assert!(matches!(err, TailorError::WorkspaceConflict { .. }));
    }
}
