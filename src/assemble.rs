//! Assembly entry points.
//!
//! A run is all-or-nothing: either every page converts and the merged
//! document is moved into place, or no output file is written and the
//! error lists what went wrong. The workspace is removed on both paths
//! unless `keep_temp` is set.

use crate::config::AssemblyConfig;
use crate::error::TailorError;
use crate::output::{AssemblyReport, PageSummary, RunStats};
use crate::pipeline::classify::{self, PageSet};
use crate::pipeline::layers::ConversionJob;
use crate::pipeline::tools::{SystemToolRunner, ToolRunner};
use crate::pipeline::workspace::RunWorkspace;
use crate::pipeline::{merge, pool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name used when no output path is given.
pub const DEFAULT_OUTPUT_NAME: &str = "output.djvu";

/// Assemble every page under `input_dir` into one bundled DjVu document.
///
/// # Arguments
/// * `input_dir`: Directory of page images, optionally with `background/`
///   and `foreground/` layer subdirectories
/// * `output`: Destination file; `None` means [`default_output_path`]
/// * `config`: Assembly configuration
///
/// # Errors
/// - Input missing, orphaned layers, identifier collisions, no pages
/// - Output exists and `overwrite` is not set
/// - Any page failed ([`TailorError::PagesFailed`] lists all of them)
/// - The merge failed
pub async fn assemble(
    input_dir: impl AsRef<Path>,
    output: Option<&Path>,
    config: &AssemblyConfig,
) -> Result<AssemblyReport, TailorError> {
    let total_start = Instant::now();
    let input_dir = input_dir.as_ref();
    info!("Starting assembly: {}", input_dir.display());

    // ── Step 1: Classify pages ───────────────────────────────────────────
    let page_set = classify::classify(input_dir, config)?;
    let total = page_set.len();

    // ── Step 2: Check destination ────────────────────────────────────────
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input_dir));
    if output.exists() && !config.overwrite {
        return Err(TailorError::OutputExists { path: output });
    }

    // ── Step 3: Prepare workspace ────────────────────────────────────────
    let workspace = RunWorkspace::create(config, total)?;
    let runner = resolve_runner(config);

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    // ── Step 4: Convert pages ────────────────────────────────────────────
    let shared = Arc::new(config.clone());
    let jobs = page_set
        .pages
        .iter()
        .map(|page| {
            let dir = workspace
                .page_dir(page.index)
                .ok_or_else(|| {
                    TailorError::Internal(format!("no workspace directory for page {}", page.index))
                })?
                .to_path_buf();
            Ok(ConversionJob {
                page: page.clone(),
                dir,
                config: Arc::clone(&shared),
            })
        })
        .collect::<Result<Vec<_>, TailorError>>()?;

    let convert_start = Instant::now();
    let outcome = pool::run_jobs(
        jobs,
        config.workers,
        Arc::clone(&runner),
        config.progress_callback.clone(),
    )
    .await;
    let conversion_ms = convert_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total, outcome.artifacts.len());
    }

    // ── Step 5: Abort on any page failure ────────────────────────────────
    if !outcome.is_complete() {
        finish_workspace(workspace);
        return Err(TailorError::PagesFailed {
            failures: outcome.failures,
            total,
        });
    }
    info!("Converted {} pages in {}ms", total, conversion_ms);

    // ── Step 6: Merge ────────────────────────────────────────────────────
    let merge_start = Instant::now();
    let merged = merge::merge_document(
        &outcome.artifacts,
        total,
        &output,
        config,
        runner.as_ref(),
    )
    .await;
    let merge_ms = merge_start.elapsed().as_millis() as u64;

    // ── Step 7: Tear down workspace ──────────────────────────────────────
    // The merge has read every artifact by now, whether it succeeded or not.
    let retained_workspace = finish_workspace(workspace);
    let output_bytes = merged?;

    // ── Step 8: Report ───────────────────────────────────────────────────
    let pages = page_set
        .pages
        .iter()
        .filter_map(|p| outcome.artifacts.get(&p.index).map(|a| PageSummary::new(p, a)))
        .collect();
    let stats = RunStats {
        total_pages: total,
        single_pages: page_set.single_count(),
        dual_pages: page_set.dual_count(),
        conversion_ms,
        merge_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
        output_bytes,
    };
    info!(
        "Assembly complete: {} pages → {} in {}ms",
        total,
        output.display(),
        stats.total_ms
    );

    Ok(AssemblyReport {
        output,
        pages,
        stats,
        retained_workspace,
    })
}

/// Synchronous wrapper around [`assemble`].
///
/// Creates a temporary tokio runtime internally.
pub fn assemble_sync(
    input_dir: impl AsRef<Path>,
    output: Option<&Path>,
    config: &AssemblyConfig,
) -> Result<AssemblyReport, TailorError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TailorError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(assemble(input_dir, output, config))
}

/// Classify `input_dir` without converting anything.
///
/// Needs no workspace and no external tools.
pub fn inspect(input_dir: impl AsRef<Path>, config: &AssemblyConfig) -> Result<PageSet, TailorError> {
    classify::classify(input_dir.as_ref(), config)
}

/// `<input_dir>/output.djvu`.
pub fn default_output_path(input_dir: impl AsRef<Path>) -> PathBuf {
    input_dir.as_ref().join(DEFAULT_OUTPUT_NAME)
}

/// Tear down the workspace without letting a cleanup failure replace the
/// run's own result.
fn finish_workspace(workspace: RunWorkspace) -> Option<PathBuf> {
    let path = workspace.path().to_path_buf();
    workspace.finish().unwrap_or_else(|e| {
        warn!("Workspace {} was not cleaned up: {}", path.display(), e);
        None
    })
}

/// Pre-built runner from the config, else real subprocesses.
fn resolve_runner(config: &AssemblyConfig) -> Arc<dyn ToolRunner> {
    match config.runner {
        Some(ref runner) => Arc::clone(runner),
        None => {
            debug!("Using system tool runner");
            Arc::new(SystemToolRunner)
        }
    }
}
