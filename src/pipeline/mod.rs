//! Pipeline stages for directory-to-DjVu assembly.
//!
//! Each submodule implements one step and is testable on its own; the
//! external programs sit behind [`tools::ToolRunner`].
//!
//! ## Data Flow
//!
//! ```text
//! classify ──▶ workspace ──▶ pool ─┬─ layers (page 1) ─┐
//! (PageSet)    (temp tree)         ├─ layers (page 2) ─┼──▶ merge ──▶ output.djvu
//!                                  └─ layers (page N) ─┘
//! ```
//!
//! 1. [`classify`]  scan the input tree into an ordered page list; rejects
//!    orphaned layers and identifier collisions before anything is written
//! 2. [`workspace`] one private directory per page under a run-scoped root
//! 3. [`pool`]      bounded concurrency over page jobs
//! 4. [`layers`]    tool chain per page kind, ending in `page.djvu`
//! 5. [`merge`]     `djvm -c` over the artifacts in page order

pub mod classify;
pub mod layers;
pub mod merge;
pub mod pool;
pub mod tools;
pub mod workspace;
