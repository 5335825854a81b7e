//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as each stage starts, finishes an item, and completes.
//!
//! # Example
//!
//! ```rust
//! use paper_digest::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ItemCounter {
//!     items: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for ItemCounter {
//!     fn on_item_complete(&self, stage: Stage, index: usize, total: usize, label: &str) {
//!         self.items.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: {index}/{total} {label}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(ItemCounter { items: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Processing,
    Classification,
    Summarization,
    Synthesis,
    Audio,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Research,
        Stage::Processing,
        Stage::Classification,
        Stage::Summarization,
        Stage::Synthesis,
        Stage::Audio,
    ];

    /// Human-readable stage name.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Processing => "processing",
            Stage::Classification => "classification",
            Stage::Summarization => "summarization",
            Stage::Synthesis => "synthesis",
            Stage::Audio => "audio",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Called by the pipeline as it works through a session.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run sequentially, so events arrive in order.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when a session starts.
    fn on_run_start(&self, session_id: &str) {
        let _ = session_id;
    }

    /// Called when a stage begins.
    ///
    /// # Arguments
    /// * `items`: number of items the stage will process (papers, topics or
    ///   narrations); 0 when unknown up front (research)
    fn on_stage_start(&self, stage: Stage, items: usize) {
        let _ = (stage, items);
    }

    /// Called after each item of a stage is finished.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position of the item
    /// * `total`: items in this stage
    /// * `label`: paper title, topic or file name
    fn on_item_complete(&self, stage: Stage, index: usize, total: usize, label: &str) {
        let _ = (stage, index, total, label);
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once after every stage succeeded and results are on disk.
    fn on_run_complete(&self, session_id: &str) {
        let _ = session_id;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TrackingCallback {
        stages: Mutex<Vec<Stage>>,
        items: AtomicUsize,
        completed: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: Stage, _items: usize) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_item_complete(&self, _stage: Stage, _index: usize, _total: usize, _label: &str) {
            self.items.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _elapsed_ms: u64) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("abcd1234");
        cb.on_stage_start(Stage::Research, 0);
        cb.on_item_complete(Stage::Processing, 1, 3, "Attention Is All You Need");
        cb.on_stage_complete(Stage::Audio, 12);
        cb.on_run_complete("abcd1234");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            stages: Mutex::new(vec![]),
            items: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        };

        for stage in Stage::ALL {
            tracker.on_stage_start(stage, 2);
            tracker.on_item_complete(stage, 1, 2, "a");
            tracker.on_item_complete(stage, 2, 2, "b");
            tracker.on_stage_complete(stage, 5);
        }

        assert_eq!(*tracker.stages.lock().unwrap(), Stage::ALL.to_vec());
        assert_eq!(tracker.items.load(Ordering::SeqCst), 12);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn stage_display_matches_label() {
        assert_eq!(Stage::Summarization.to_string(), "summarization");
        assert_eq!(
            serde_json::to_string(&Stage::Classification).unwrap(),
            "\"classification\""
        );
    }
}
