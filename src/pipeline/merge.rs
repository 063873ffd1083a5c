//! Document merge: per-page artifacts → one bundled multi-page DjVu.
//!
//! `djvm -c` writes to a sibling `*.partial` file which is renamed over the
//! destination only on success, so a failed merge never leaves a truncated
//! document behind.

use crate::config::AssemblyConfig;
use crate::error::TailorError;
use crate::output::PerPageArtifact;
use crate::pipeline::tools::{run_step, Tool, ToolInvocation, ToolRunner};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bundle `artifacts` in ascending index order into `output`.
///
/// Every index in `1..=total` must be present. Returns the size of the
/// written document.
pub async fn merge_document(
    artifacts: &BTreeMap<usize, PerPageArtifact>,
    total: usize,
    output: &Path,
    config: &AssemblyConfig,
    runner: &dyn ToolRunner,
) -> Result<u64, TailorError> {
    let missing: Vec<usize> = (1..=total).filter(|i| !artifacts.contains_key(i)).collect();
    if !missing.is_empty() || total == 0 {
        return Err(TailorError::IncompleteResult { missing, total });
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TailorError::io(format!("Failed to create {}", parent.display()), e))?;
    }

    let partial = partial_path(output);
    let mut inv = ToolInvocation::new(&config.toolchain, Tool::Djvm, &partial)
        .arg("-c")
        .arg(&partial);
    // BTreeMap iteration is ascending by index.
    for artifact in artifacts.range(1..=total).map(|(_, a)| a) {
        inv = inv.arg(&artifact.path);
    }
    debug!("Merging {} pages: {}", total, inv.command_line());

    let bytes = run_step(runner, &inv, config.tool_timeout())
        .await
        .map_err(|failure| TailorError::Assembly { failure })?;

    if let Err(e) = tokio::fs::rename(&partial, output).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(TailorError::io(
            format!("Failed to move document into place at {}", output.display()),
            e,
        ));
    }

    info!("Wrote {} ({} pages, {} bytes)", output.display(), total, bytes);
    Ok(bytes)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output.djvu".into());
    name.push(".partial");
    output.with_file_name(name)
}
