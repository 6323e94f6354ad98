//! Progress-callback trait for structuring events.
//!
//! Inject an [`Arc<dyn StructureProgressCallback>`] via
//! [`crate::config::StructureConfigBuilder::progress_callback`] to receive
//! events as the structurer converts batches and writes pages. The CLI uses it
//! to drive an `indicatif` progress bar; library callers can forward events
//! anywhere.

use std::sync::Arc;

/// Called by the page structurer as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait StructureProgressCallback: Send + Sync {
    /// Called once after page selection, before the first batch.
    fn on_structure_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a contiguous batch of pages is sent to the converter.
    ///
    /// # Arguments
    /// * `start`, `end` — inclusive 1-indexed page range of the batch
    fn on_batch_start(&self, start: u32, end: u32) {
        let _ = (start, end);
    }

    /// Called when a page manifest has been written.
    ///
    /// # Arguments
    /// * `page_num` — 1-indexed page number
    /// * `tables`   — tables recorded on the page
    /// * `figures`  — figures recorded on the page
    fn on_page_complete(&self, page_num: u32, tables: usize, figures: usize) {
        let _ = (page_num, tables, figures);
    }

    /// Called when a page was rebuilt by the vision fallback.
    fn on_page_fallback(&self, page_num: u32) {
        let _ = page_num;
    }

    /// Called when a page is left absent (no converter output, no fallback).
    fn on_page_skipped(&self, page_num: u32, reason: &str) {
        let _ = (page_num, reason);
    }

    /// Called once after all batches have been attempted.
    fn on_structure_complete(&self, written: usize, skipped: usize) {
        let _ = (written, skipped);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl StructureProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StructureConfig`].
pub type ProgressCallback = Arc<dyn StructureProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        batches: AtomicUsize,
        pages: AtomicUsize,
        fallbacks: AtomicUsize,
        skipped: AtomicUsize,
    }

    impl StructureProgressCallback for TrackingCallback {
        fn on_batch_start(&self, _start: u32, _end: u32) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: u32, _tables: usize, _figures: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_fallback(&self, _page_num: u32) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_skipped(&self, _page_num: u32, _reason: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_structure_start(5);
        cb.on_batch_start(1, 5);
        cb.on_page_complete(1, 2, 0);
        cb.on_page_fallback(12);
        cb.on_page_skipped(3, "no converter output");
        cb.on_structure_complete(4, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_batch_start(11, 13);
        tracker.on_page_complete(11, 1, 0);
        tracker.on_page_fallback(12);
        tracker.on_page_skipped(13, "fallback disabled");

        assert_eq!(tracker.batches.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_structure_start(10);
        cb.on_page_complete(1, 0, 0);
    }
}
