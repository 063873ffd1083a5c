//! Page classification: turn an input directory into an ordered page set.
//!
//! ## Layout
//!
//! ```text
//! INPUT_DIR/
//!   0001.tif              single-layer page
//!   0002.tif              single-layer page
//!   0003.tif              optional placeholder for the separated page below
//!   background/0003.tif   continuous-tone layer ┐ one dual-layer page
//!   foreground/0003.tif   bitonal mask layer    ┘
//! ```
//!
//! Classification is two passes. The first records, for every normalised
//! page identifier, which roles (top-level, background, foreground) were
//! seen. The second validates each identifier's role set and only then
//! builds descriptors, so the outcome never depends on `read_dir` order.

use crate::config::AssemblyConfig;
use crate::error::{InputStructureError, TailorError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a page image was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerRole {
    /// Directly inside the input directory.
    Loose,
    Background,
    Foreground,
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayerRole::Loose => "top-level",
            LayerRole::Background => "background",
            LayerRole::Foreground => "foreground",
        })
    }
}

/// Source files of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PageKind {
    Single { path: PathBuf },
    Dual { background: PathBuf, foreground: PathBuf },
}

impl PageKind {
    pub fn is_dual(&self) -> bool {
        matches!(self, PageKind::Dual { .. })
    }
}

/// One logical page, immutable once classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 1-based position in the final document.
    pub index: usize,
    /// File stem the page was discovered under, e.g. `0003`.
    pub id: String,
    pub kind: PageKind,
}

/// Ordered, gap-free pages of one input directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSet {
    pub root: PathBuf,
    pub pages: Vec<PageDescriptor>,
}

impl PageSet {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn dual_count(&self) -> usize {
        self.pages.iter().filter(|p| p.kind.is_dual()).count()
    }

    pub fn single_count(&self) -> usize {
        self.len() - self.dual_count()
    }
}

// ── Page keys ────────────────────────────────────────────────────────────────

static RE_KEY_TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+|[^0-9]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum KeyToken {
    /// Digit run without leading zeros; `len` first so 9 < 10.
    Number { len: usize, digits: String },
    Text(String),
}

/// Sort key and identity of a page.
///
/// Digit runs compare numerically (`2` < `10`, `007` == `7`) and text
/// compares case-insensitively, so `Page7.TIF` and `page007.tif` are the
/// same page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey(Vec<KeyToken>);

impl PageKey {
    pub fn from_stem(stem: &str) -> Self {
        let tokens = RE_KEY_TOKENS
            .find_iter(stem)
            .map(|m| {
                let s = m.as_str();
                if s.as_bytes()[0].is_ascii_digit() {
                    let trimmed = s.trim_start_matches('0');
                    let digits = if trimmed.is_empty() { "0" } else { trimmed };
                    KeyToken::Number {
                        len: digits.len(),
                        digits: digits.to_string(),
                    }
                } else {
                    KeyToken::Text(s.to_lowercase())
                }
            })
            .collect();
        PageKey(tokens)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.0 {
            match t {
                KeyToken::Number { digits, .. } => f.write_str(digits)?,
                KeyToken::Text(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Observed {
    id: String,
    roles: BTreeMap<LayerRole, PathBuf>,
}

/// Classify every page under `root`.
///
/// Reads the filesystem only; the input directory is never modified.
///
/// # Errors
/// - [`TailorError::InputNotFound`] if `root` is not a directory
/// - [`InputStructureError::OrphanedLayer`] for a layer without its partner
/// - [`InputStructureError::IdentifierCollision`] when two files in the same
///   place normalise to one identifier, or when layer files sharing a key are
///   not named identically
/// - [`InputStructureError::NoPages`] when nothing matched
pub fn classify(root: &Path, config: &AssemblyConfig) -> Result<PageSet, TailorError> {
    if !root.is_dir() {
        return Err(TailorError::InputNotFound {
            path: root.to_path_buf(),
        });
    }

    // Pass 1: identifier → roles observed.
    let mut observed: BTreeMap<PageKey, Observed> = BTreeMap::new();
    let sources = [
        (root.to_path_buf(), LayerRole::Loose),
        (root.join(&config.layout.background), LayerRole::Background),
        (root.join(&config.layout.foreground), LayerRole::Foreground),
    ];
    for (dir, role) in &sources {
        if *role != LayerRole::Loose && !dir.is_dir() {
            debug!("No {} directory at {}", role, dir.display());
            continue;
        }
        for (stem, path) in list_images(dir, config)? {
            let entry = observed.entry(PageKey::from_stem(&stem)).or_default();
            if entry.id.is_empty() {
                entry.id = stem.clone();
            }
            if let Some(first) = entry.roles.get(role) {
                return Err(InputStructureError::IdentifierCollision {
                    id: entry.id.clone(),
                    first: first.clone(),
                    second: path,
                }
                .into());
            }
            entry.roles.insert(*role, path);
        }
    }

    // Pass 2: validate role sets and build descriptors in key order.
    let mut pages = Vec::with_capacity(observed.len());
    for (key, mut obs) in observed {
        let background = obs.roles.remove(&LayerRole::Background);
        let foreground = obs.roles.remove(&LayerRole::Foreground);
        let loose = obs.roles.remove(&LayerRole::Loose);

        let kind = match (background, foreground, loose) {
            (Some(background), Some(foreground), placeholder) => {
                // Layers pair by exact file name; `7` and `007` share a key
                // but are not a pair.
                if background.file_stem() != foreground.file_stem() {
                    return Err(InputStructureError::IdentifierCollision {
                        id: obs.id,
                        first: background,
                        second: foreground,
                    }
                    .into());
                }
                if let Some(p) = placeholder {
                    if p.file_stem() != background.file_stem() {
                        return Err(InputStructureError::IdentifierCollision {
                            id: obs.id,
                            first: p,
                            second: background,
                        }
                        .into());
                    }
                    debug!("Page '{}': top-level {} superseded by layers", key, p.display());
                }
                PageKind::Dual {
                    background,
                    foreground,
                }
            }
            (Some(_), None, _) => {
                return Err(InputStructureError::OrphanedLayer {
                    page: obs.id,
                    present_in: LayerRole::Background,
                    missing_from: LayerRole::Foreground,
                }
                .into())
            }
            (None, Some(_), _) => {
                return Err(InputStructureError::OrphanedLayer {
                    page: obs.id,
                    present_in: LayerRole::Foreground,
                    missing_from: LayerRole::Background,
                }
                .into())
            }
            (None, None, Some(path)) => PageKind::Single { path },
            (None, None, None) => continue,
        };

        pages.push(PageDescriptor {
            index: pages.len() + 1,
            id: obs.id,
            kind,
        });
    }

    if pages.is_empty() {
        return Err(InputStructureError::NoPages {
            root: root.to_path_buf(),
        }
        .into());
    }

    let set = PageSet {
        root: root.to_path_buf(),
        pages,
    };
    info!(
        "Classified {} pages ({} single, {} dual) in {}",
        set.len(),
        set.single_count(),
        set.dual_count(),
        root.display()
    );
    Ok(set)
}

/// Accepted image files directly inside `dir`, as `(stem, path)` sorted by name.
fn list_images(dir: &Path, config: &AssemblyConfig) -> Result<Vec<(String, PathBuf)>, TailorError> {
    let unreadable = |e: std::io::Error| InputStructureError::Unreadable {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if stem.starts_with('.') || !config.accepts_extension(ext) {
            continue;
        }
        let stem = stem.to_string();
        found.push((stem, path));
    }
    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}
