//! Bounded worker pool over conversion jobs.
//!
//! Jobs are fed from one stream and at most `workers` run at a time
//! (`buffer_unordered`). Completion order is arbitrary; results are keyed by
//! page index so the merge never depends on it. A failed page does not stop
//! the others: every job runs to completion and all failures are reported
//! together.

use crate::error::ConversionError;
use crate::output::PerPageArtifact;
use crate::pipeline::layers::{convert_page, ConversionJob};
use crate::pipeline::tools::ToolRunner;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the pool produced.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    pub artifacts: BTreeMap<usize, PerPageArtifact>,
    /// Sorted by page index.
    pub failures: Vec<ConversionError>,
}

impl PoolOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every job with at most `workers` in flight.
pub async fn run_jobs(
    jobs: Vec<ConversionJob>,
    workers: usize,
    runner: Arc<dyn ToolRunner>,
    progress: Option<ProgressCallback>,
) -> PoolOutcome {
    let total = jobs.len();
    let workers = workers.max(1);
    info!("Converting {} pages with {} worker(s)", total, workers);

    let results: Vec<Result<PerPageArtifact, ConversionError>> =
        stream::iter(jobs.into_iter().map(|job| {
            let runner = Arc::clone(&runner);
            let progress = progress.clone();
            async move {
                let page = job.page.index;
                if let Some(ref cb) = progress {
                    cb.on_page_start(page, total);
                }
                let result = convert_page(&job, runner.as_ref()).await;
                match result {
                    Ok(ref artifact) => {
                        if let Some(ref cb) = progress {
                            cb.on_page_complete(page, total, artifact.bytes);
                        }
                    }
                    Err(ref e) => {
                        warn!("{}", e);
                        if let Some(ref cb) = progress {
                            cb.on_page_error(page, total, &e.to_string());
                        }
                    }
                }
                result
            }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut outcome = PoolOutcome::default();
    for result in results {
        match result {
            Ok(artifact) => {
                outcome.artifacts.insert(artifact.index, artifact);
            }
            Err(e) => outcome.failures.push(e),
        }
    }
    outcome.failures.sort_by_key(|e| e.page);
    outcome
}
