use std::path::PathBuf;
use std::time::Duration;

use crate::corners::CornerScope;
use crate::guard::MemoryGuard;
use crate::store::CachePolicy;

// -----------------------------------------------------------------------------
// Constants & Configuration
// -----------------------------------------------------------------------------

/// Rectangles with fewer points than this draw [`SMALL_SAMPLE`] points in phase 1.
pub const SMALL_RECT_POINTS: u64 = 100_000;

/// Rectangles with more points than this draw [`LARGE_SAMPLE`] points in phase 1.
pub const LARGE_RECT_POINTS: u64 = 10_000_000;

pub const SMALL_SAMPLE: usize = 100;
pub const MEDIUM_SAMPLE: usize = 500;
pub const LARGE_SAMPLE: usize = 2_000;

/// Rows kept by the default row cache before it is cleared.
pub const DEFAULT_ROW_CACHE: usize = 100;

/// Corner batches per worker when the batch count is not given.
pub const BATCHES_PER_WORKER: usize = 4;

/// Upper bound on corners in a single batch, which caps the pairs a work unit holds.
pub const MAX_BATCH_CORNERS: usize = 1_024;

pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Rows rasterized in parallel before they are flushed, in order, to the sink.
pub const RASTER_CHUNK_ROWS: usize = 256;

/// Records between two memory checks while scanning or writing large files.
pub const MEMORY_CHECK_EVERY: usize = 1_000;

/// Largest grid the in-memory strategy accepts.
pub const MAX_IN_MEMORY_TILES: u64 = 1 << 28;

/// How a candidate rectangle is proven green.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Check every row of the rectangle.
    Exhaustive,
    /// Reject early on a random sample, then check every row of the survivors.
    #[default]
    Sampled,
}

/// Where the green tile rows live while searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    InMemory,
    /// Rows are written to a Row Store file and paged in on demand.
    Streaming,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Smallest area worth validating.
    pub min_area: u64,
    /// Rectangles above this area are skipped outright. A cost control, not a rule.
    pub max_area: Option<u64>,
    pub validation: Validation,
    pub cache: CachePolicy,
    /// Worker threads; `None` uses every core.
    pub workers: Option<usize>,
    /// Corner batches; `None` derives it from the worker count.
    pub batches: Option<usize>,
    pub max_batch_corners: usize,
    /// Soft budget for confirming a single rectangle. Exceeding it rejects the rectangle.
    pub rect_time_budget: Option<Duration>,
    pub seed: u64,
    pub progress_interval: Duration,
    pub show_progress: bool,
    /// Appends every new best rectangle to this file as it is found.
    pub best_log: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_area: 0,
            max_area: None,
            validation: Validation::default(),
            cache: CachePolicy::default(),
            workers: None,
            batches: None,
            max_batch_corners: MAX_BATCH_CORNERS,
            rect_time_budget: None,
            seed: 0x5eed_7115,
            progress_interval: PROGRESS_INTERVAL,
            show_progress: false,
            best_log: None,
        }
    }
}

impl SearchConfig {
    pub fn with_min_area(mut self, min_area: u64) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn with_batches(mut self, batches: usize) -> Self {
        self.batches = Some(batches.max(1));
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_best_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.best_log = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub strategy: Strategy,
    pub scope: CornerScope,
    pub search: SearchConfig,
    pub memory: MemoryGuard,
    pub max_in_memory_tiles: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            scope: CornerScope::default(),
            search: SearchConfig::default(),
            memory: MemoryGuard::default(),
            max_in_memory_tiles: MAX_IN_MEMORY_TILES,
        }
    }
}

impl PipelineConfig {
    pub fn show_progress(&self) -> bool {
        self.search.show_progress
    }
}
