//! Progress-callback trait for per-page assembly events.
//!
//! Inject an [`Arc<dyn AssemblyProgressCallback>`] via
//! [`crate::config::AssemblyConfigBuilder::progress_callback`] to receive
//! events as the worker pool converts each page. Events are purely
//! observational: nothing a callback does can change which page runs next.
//!
//! # Example
//!
//! ```rust
//! use djvu_tailor::{AssemblyProgressCallback, AssemblyConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl AssemblyProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: usize, total_pages: usize, artifact_bytes: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page, total_pages, artifact_bytes);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = AssemblyConfig::builder()
//!     .progress_callback(counter as Arc<dyn AssemblyProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it converts each page.
///
/// Implementations must be `Send + Sync`. With more than one worker,
/// `on_page_start`, `on_page_complete` and `on_page_error` arrive
/// concurrently and in completion order, not page order.
pub trait AssemblyProgressCallback: Send + Sync {
    /// Called once, after classification, before any page is converted.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a worker picks up a page (1-based index).
    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page artifact is in place.
    ///
    /// `artifact_bytes` is the size of the finished per-page DjVu file.
    fn on_page_complete(&self, page: usize, total_pages: usize, artifact_bytes: u64) {
        let _ = (page, total_pages, artifact_bytes);
    }

    /// Called when a page's conversion chain fails.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AssemblyProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AssemblyConfig`].
pub type ProgressCallback = Arc<dyn AssemblyProgressCallback>;
