//! Result types returned by the assembly entry points.

use crate::pipeline::classify::PageDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a page was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageEncoding {
    /// Single JB2 layer (`cjb2`).
    Bitonal,
    /// Single IW44 layer (`c44`).
    Photo,
    /// JB2 mask over IW44 background (`csepdjvu`).
    Compound,
}

/// Finished single-page DjVu file for one page index.
///
/// Lives inside the run workspace and is read-only once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPageArtifact {
    /// 1-based page index.
    pub index: usize,
    pub path: PathBuf,
    pub bytes: u64,
    pub encoding: PageEncoding,
    pub duration_ms: u64,
}

/// One line of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    pub index: usize,
    pub id: String,
    pub encoding: PageEncoding,
    pub artifact_bytes: u64,
    pub duration_ms: u64,
}

impl PageSummary {
    pub fn new(page: &PageDescriptor, artifact: &PerPageArtifact) -> Self {
        Self {
            index: page.index,
            id: page.id.clone(),
            encoding: artifact.encoding,
            artifact_bytes: artifact.bytes,
            duration_ms: artifact.duration_ms,
        }
    }
}

/// Timing and size totals for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub single_pages: usize,
    pub dual_pages: usize,
    pub conversion_ms: u64,
    pub merge_ms: u64,
    pub total_ms: u64,
    pub output_bytes: u64,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyReport {
    /// Path of the assembled document.
    pub output: PathBuf,
    /// Pages in document order.
    pub pages: Vec<PageSummary>,
    pub stats: RunStats,
    /// Workspace left on disk when `keep_temp` was set.
    pub retained_workspace: Option<PathBuf>,
}
