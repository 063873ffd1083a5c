//! # djvu-tailor
//!
//! Assemble a directory of scanned page images into one bundled multi-page
//! DjVu document.
//!
//! Each page is either a single image, encoded bitonal (JB2) or
//! continuous-tone (IW44) depending on how it is stored, or a separated
//! pair: a continuous-tone background under a bitonal foreground mask,
//! composited into one compound page. Encoding is done by the netpbm and
//! djvulibre command-line programs; this crate classifies the input, drives
//! those programs for many pages in parallel, and merges the results in page
//! order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Classify   ordered PageSet; orphaned layers and collisions rejected
//!  ├─ 2. Workspace  run-scoped temp tree, one directory per page
//!  ├─ 3. Convert    bounded worker pool, one tool chain per page kind
//!  ├─ 4. Merge      djvm -c in page order, atomic rename into place
//!  └─ 5. Report     per-page sizes and timings
//! ```
//!
//! A run is all-or-nothing: if any page fails, every failure is reported and
//! no output document is written.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use djvu_tailor::{assemble, AssemblyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AssemblyConfig::builder().dpi(600).workers(4).build()?;
//!     let report = assemble("scans/book", None, &config).await?;
//!     eprintln!("{} pages → {}", report.stats.total_pages, report.output.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `djvu-tailor` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! djvu-tailor = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble, assemble_sync, default_output_path, inspect};
pub use config::{AssemblyConfig, AssemblyConfigBuilder, LayerLayout, SliceQuality, ToneDetection};
pub use error::{ConversionError, InputStructureError, Stage, StepFailure, TailorError};
pub use output::{AssemblyReport, PageEncoding, PageSummary, PerPageArtifact, RunStats};
pub use pipeline::classify::{LayerRole, PageDescriptor, PageKind, PageSet};
pub use pipeline::tools::{SystemToolRunner, Tool, ToolInvocation, ToolRunner, Toolchain};
pub use progress::{AssemblyProgressCallback, NoopProgressCallback, ProgressCallback};
