use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use rayon::prelude::*;

use crate::config::{SearchConfig, BATCHES_PER_WORKER};
use crate::error::{Result, TheaterError};
use crate::polygon::{BoundingBox, Vertex};
use crate::progress::{self, ProgressBoard, WorkerLines, WorkerStatus};
use crate::search::{
    candidates_between, candidates_within, first_valid, AreaFilter, BestLog, Candidate, Scan,
    SearchOutcome, SearchState, SearchStats, Validator,
};
use crate::store::{RowBackend, RowSource};

/// Shared cooperative stop flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Splits `len` corners into at most `batches` contiguous ranges of near-equal size.
pub fn partition(len: usize, batches: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let size = len.div_ceil(batches.clamp(1, len));
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Pairs of corners from batch `left` and batch `right`; `left == right` is a batch
/// with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    pub left: usize,
    pub right: usize,
    /// Area of the box around both batches. No pair of the unit can be larger.
    pub bound: u64,
}

/// Every within-batch and cross-batch unit, largest bound first.
pub fn plan_units(corners: &[Vertex], batches: &[Range<usize>]) -> Vec<WorkUnit> {
    let boxes = batches
        .iter()
        .map(|batch| BoundingBox::around(corners[batch.clone()].iter().copied()))
        .collect::<Vec<_>>();

    let mut units = Vec::with_capacity(batches.len() * (batches.len() + 1) / 2);
    for left in 0..batches.len() {
        for right in left..batches.len() {
            let bound = match (boxes[left], boxes[right]) {
                (Some(a), Some(b)) => a
                    .including(Vertex::new(b.min_x, b.min_y))
                    .including(Vertex::new(b.max_x, b.max_y))
                    .tiles(),
                _ => 0,
            };
            units.push(WorkUnit { left, right, bound });
        }
    }
    units.sort_by(|a, b| b.bound.cmp(&a.bound));
    units
}

/// What one worker contributes to the reduction.
#[derive(Debug, Clone, Copy, Default)]
struct Partial {
    state: SearchState,
    stats: SearchStats,
    cancelled: bool,
}

impl Partial {
    fn merge(mut self, other: Self) -> Self {
        self.state = self.state.merge(other.state);
        self.stats += other.stats;
        self.cancelled |= other.cancelled;
        self
    }
}

/// Read-only state every unit sees.
struct Plan<'a> {
    corners: &'a [Vertex],
    batches: &'a [Range<usize>],
    filter: AreaFilter,
    /// Best area found by any worker. Only ever used to skip work.
    best: &'a AtomicU64,
    log: Option<&'a BestLog>,
    board: &'a ProgressBoard,
    interval: Duration,
}

struct Telemetry {
    id: usize,
    processed: u64,
    started: Instant,
    reported: Instant,
}

impl Telemetry {
    fn publish(&mut self, board: &ProgressBoard, status: WorkerStatus) {
        let secs = self.started.elapsed().as_secs_f64();
        board.update(
            self.id,
            WorkerStatus {
                processed: self.processed,
                rate: if secs > 0.0 { self.processed as f64 / secs } else { 0.0 },
                ..status
            },
        );
        self.reported = Instant::now();
    }
}

struct Worker<S> {
    validator: Validator<S>,
    telemetry: Telemetry,
    /// Cache counters already folded into a [`Partial`].
    cache_seen: (u64, u64),
}

impl<S: RowSource> Worker<S> {
    fn run_unit(&mut self, unit: &WorkUnit, plan: &Plan<'_>) -> Result<Partial> {
        let mut partial = Partial::default();
        if self.validator.is_stopped() {
            partial.cancelled = true;
            return Ok(partial);
        }
        partial.stats.units = 1;

        let best = plan.best.load(Ordering::Relaxed);
        if unit.bound < plan.filter.min_area || unit.bound < best {
            partial.stats.units_skipped = 1;
            plan.board.unit_done();
            return Ok(partial);
        }

        let left = &plan.corners[plan.batches[unit.left].clone()];
        let candidates = if unit.left == unit.right {
            candidates_within(left, plan.filter)
        } else {
            let right = &plan.corners[plan.batches[unit.right].clone()];
            candidates_between(left, right, plan.filter)
        };
        partial.stats.candidates = candidates.len() as u64;

        let validator = &mut self.validator;
        let telemetry = &mut self.telemetry;
        let total = candidates.len() as u64;
        let scan = first_valid(
            &candidates,
            validator,
            || plan.best.load(Ordering::Relaxed),
            &mut partial.stats,
            |_, candidate: &Candidate| {
                telemetry.processed += 1;
                if telemetry.reported.elapsed() >= plan.interval {
                    telemetry.publish(
                        plan.board,
                        WorkerStatus {
                            total,
                            best_area: plan.best.load(Ordering::Relaxed),
                            activity: format!("batches {} x {}", unit.left, unit.right),
                            current: Some(candidate.rect),
                            ..Default::default()
                        },
                    );
                }
            },
        )?;

        match scan {
            Scan::Found(candidate) => {
                match plan.log {
                    Some(log) => {
                        log.offer(plan.best, &candidate)?;
                    }
                    None => {
                        plan.best.fetch_max(candidate.area, Ordering::Relaxed);
                    }
                }
                partial.state.offer(candidate);
                tracing::debug!(area = candidate.area, rect = %candidate.rect, ?unit, "unit found a rectangle");
            }
            Scan::Cancelled => partial.cancelled = true,
            Scan::Exhausted => {}
        }

        let (hits, misses) = self.validator.cache_stats();
        partial.stats.cache_hits = hits - self.cache_seen.0;
        partial.stats.cache_misses = misses - self.cache_seen.1;
        self.cache_seen = (hits, misses);

        self.telemetry.publish(
            plan.board,
            WorkerStatus {
                total,
                best_area: plan.best.load(Ordering::Relaxed),
                activity: "idle".to_string(),
                ..Default::default()
            },
        );
        plan.board.unit_done();
        Ok(partial)
    }
}

/// Runs the search over batches of corners on a rayon pool.
pub struct Distributor<'c> {
    config: &'c SearchConfig,
}

impl<'c> Distributor<'c> {
    pub fn new(config: &'c SearchConfig) -> Self {
        Self { config }
    }

    pub fn workers(&self) -> usize {
        self.config
            .workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }

    /// Enough batches to keep every worker busy, and small enough that no batch holds
    /// more than `max_batch_corners` corners.
    pub fn batch_count(&self, corners: usize) -> usize {
        let wanted = self
            .config
            .batches
            .unwrap_or(self.workers() * BATCHES_PER_WORKER);
        let by_size = corners.div_ceil(self.config.max_batch_corners.max(1));
        wanted.max(by_size).clamp(1, corners.max(1))
    }

    pub fn run<B: RowBackend>(
        &self,
        corners: &[Vertex],
        rows: &B,
        stop: &StopToken,
        board: &ProgressBoard,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let workers = self.workers();
        let batches = partition(corners.len(), self.batch_count(corners.len()));
        let units = plan_units(corners, &batches);
        board.set_units(units.len());
        tracing::info!(
            workers,
            batches = batches.len(),
            units = units.len(),
            "searching corner pairs"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("search-{i}"))
            .build()
            .map_err(|e| TheaterError::WorkerInit {
                reason: e.to_string(),
            })?;

        let log = self
            .config
            .best_log
            .as_deref()
            .map(BestLog::open)
            .transpose()?;
        if let Some(log) = &log {
            tracing::info!(path = %log.path().display(), "logging new best rectangles");
        }

        let best = AtomicU64::new(0);
        let plan = Plan {
            corners,
            batches: &batches,
            filter: AreaFilter::new(self.config),
            best: &best,
            log: log.as_ref(),
            board,
            interval: self.config.progress_interval,
        };
        let mut lines = WorkerLines::new(self.config.show_progress);
        let bar = lines.add(progress::count_bar(
            units.len() as u64,
            self.config.show_progress,
            "searching",
        ));
        let (finished, reporter_rx) = mpsc::channel::<()>();

        let partial = thread::scope(|scope| {
            scope.spawn(|| {
                report(
                    board,
                    &bar,
                    &mut lines,
                    reporter_rx,
                    self.config.progress_interval,
                )
            });

            let partial = pool.install(|| {
                units
                    .par_iter()
                    .map_init(
                        || self.open_worker(rows, stop),
                        |worker, unit| match worker {
                            Ok(worker) => worker.run_unit(unit, &plan),
                            Err(e) => Err(TheaterError::WorkerInit {
                                reason: e.to_string(),
                            }),
                        },
                    )
                    .try_reduce(Partial::default, |a, b| Ok(a.merge(b)))
            });
            drop(finished);
            partial
        })?;
        lines.clear();
        bar.finish_and_clear();

        Ok(SearchOutcome {
            best: partial.state.best(),
            stats: partial.stats,
            cancelled: partial.cancelled || stop.is_stopped(),
            elapsed: started.elapsed(),
        })
    }

    fn open_worker<B: RowBackend>(&self, rows: &B, stop: &StopToken) -> Result<Worker<B::Source>> {
        let id = rayon::current_thread_index().unwrap_or(0);
        let seed = self.config.seed ^ (id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let now = Instant::now();
        Ok(Worker {
            validator: Validator::with_seed(rows.open_source()?, self.config, seed, stop.clone()),
            telemetry: Telemetry {
                id,
                processed: 0,
                started: now,
                reported: now,
            },
            cache_seen: (0, 0),
        })
    }
}

/// Redraws the search bar and the worker lines every `interval` until the sender side
/// is dropped.
fn report(
    board: &ProgressBoard,
    bar: &ProgressBar,
    lines: &mut WorkerLines,
    finished: mpsc::Receiver<()>,
    interval: Duration,
) {
    loop {
        lines.refresh(board);
        let (done, _) = board.units();
        bar.set_position(done as u64);
        bar.set_message(format!(
            "best {} | {} checked | {:.0}/s",
            board.best_area(),
            board.processed(),
            board.rate()
        ));
        match finished.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
