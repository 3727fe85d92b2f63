//! Progress-callback trait for per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the coordinator resolves each page. Callers can forward them to
//! a terminal progress bar, a channel, or a log without the library knowing
//! how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_batch::{BatchProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the batch coordinator as it processes each page.
///
/// Pages run concurrently, so every method may be called from several tasks
/// at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any page is dispatched.
    fn on_batch_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page has acquired a concurrency slot for its first attempt.
    ///
    /// `page_num` is the 1-indexed page number in the source document.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when an attempt failed with a retriable error and the page will
    /// be retried after `delay`.
    fn on_page_retry(&self, page_num: usize, attempt: u32, delay: Duration, error: &str) {
        let _ = (page_num, attempt, delay, error);
    }

    /// Called when a page is successfully transcribed.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Called when a page reaches a terminal failure.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has an outcome.
    fn on_batch_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
