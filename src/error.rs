//! Error types for the djvu-tailor library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TailorError`] is **fatal**: the run cannot produce a document (bad
//!   input layout, unusable workspace, failed merge). Returned as
//!   `Err(TailorError)` from the top-level `assemble*` functions.
//!
//! * [`ConversionError`] is **per page**: one page's tool chain failed at a
//!   named [`Stage`]. Sibling pages keep converting; every failure is
//!   collected and surfaced together in [`TailorError::PagesFailed`] once the
//!   conversion phase has drained.

use crate::pipeline::classify::LayerRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the djvu-tailor library.
#[derive(Debug, Error)]
pub enum TailorError {
    // ── Pre-flight errors ─────────────────────────────────────────────────
    /// Input directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// The page directory contents are malformed or inconsistent.
    #[error(transparent)]
    InputStructure(#[from] InputStructureError),

    /// The temp location cannot be used for this run.
    #[error("Workspace '{path}' cannot be used: {reason}\nChoose an empty directory with --temp-dir.")]
    WorkspaceConflict { path: PathBuf, reason: String },

    /// Output file exists and overwriting was not requested.
    #[error("Output file '{path}' already exists.\nPass --overwrite to replace it.")]
    OutputExists { path: PathBuf },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// At least one page failed; assembly was skipped.
    #[error("{}/{total} pages failed to convert; no document was written", .failures.len())]
    PagesFailed {
        failures: Vec<ConversionError>,
        total: usize,
    },

    // ── Post-flight errors ────────────────────────────────────────────────
    /// Merge attempted while page artifacts are missing.
    #[error("Cannot assemble document: no artifact for page(s) {missing:?} of {total}")]
    IncompleteResult { missing: Vec<usize>, total: usize },

    /// The merge tool itself failed.
    #[error("Document assembly failed: {failure}")]
    Assembly { failure: StepFailure },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TailorError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TailorError::Io {
            context: context.into(),
            source,
        }
    }

    /// Multi-line summary naming every failed page and its failing stage.
    ///
    /// For errors other than [`TailorError::PagesFailed`] this is just the
    /// display string.
    pub fn failure_summary(&self) -> String {
        match self {
            TailorError::PagesFailed { failures, total } => {
                let mut out = format!("{}/{} pages failed:", failures.len(), total);
                for f in failures {
                    out.push_str(&format!("\n  page {:>4}  [{}]  {}", f.page, f.stage, f.failure));
                }
                out
            }
            other => other.to_string(),
        }
    }
}

/// Malformed or inconsistent page directory contents.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputStructureError {
    /// A layer file has no counterpart in the other layer directory.
    #[error("Page '{page}' exists in the {present_in} directory but not in the {missing_from} directory")]
    OrphanedLayer {
        page: String,
        present_in: LayerRole,
        missing_from: LayerRole,
    },

    /// Nothing that looks like a page image was found.
    #[error("No page images found under '{root}'")]
    NoPages { root: PathBuf },

    /// Two files normalise to the same page identifier.
    #[error("Page identifier '{id}' is ambiguous: '{first}' and '{second}'")]
    IdentifierCollision {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A directory could not be listed.
    #[error("Cannot read '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },
}

/// Named step of a page's conversion chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Reading the source header to pick bitonal vs continuous-tone.
    DetectTone,
    /// Raster → PNM for a single-layer photographic page.
    DecodeSingle,
    /// Bitonal single page → JB2 layer.
    EncodeBitonal,
    /// PNM → IW44 layer.
    EncodePhoto,
    /// Foreground raster → PBM.
    DecodeForeground,
    /// Background raster → PNM.
    DecodeBackground,
    /// PBM → DjVu RLE mask.
    EncodeMask,
    /// Concatenating mask and background into one separated stream.
    JoinLayers,
    /// Separated stream → compound page.
    Composite,
    /// Moving the validated product to its final path.
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DetectTone => "detect-tone",
            Stage::DecodeSingle => "decode-single",
            Stage::EncodeBitonal => "encode-bitonal",
            Stage::EncodePhoto => "encode-photo",
            Stage::DecodeForeground => "decode-foreground",
            Stage::DecodeBackground => "decode-background",
            Stage::EncodeMask => "encode-mask",
            Stage::JoinLayers => "join-layers",
            Stage::Composite => "composite",
            Stage::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// Why one step (usually one subprocess) failed.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepFailure {
    /// The program could not be started at all.
    #[error("could not start '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// The program exited non-zero (or was killed by a signal: `code = None`).
    #[error("'{program}' exited with {}: {}", .code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")), .stderr.trim())]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The program exceeded the configured per-call timeout.
    #[error("'{program}' timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    /// The program succeeded but its product is missing or empty.
    #[error("'{program}' produced no output at '{path}'")]
    EmptyOutput { program: String, path: PathBuf },

    /// Filesystem error around a step (redirects, rename, concatenation).
    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },

    /// A source image could not be opened or decoded.
    #[error("cannot read image '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },
}

/// A failure for a single page, tagged with where in the chain it happened.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Page {page}: {stage} failed: {failure}")]
pub struct ConversionError {
    /// 1-based page index.
    pub page: usize,
    pub stage: Stage,
    pub failure: StepFailure,
}
