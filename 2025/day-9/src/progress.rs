use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::search::Rect;

/// Bar over a count of rows or work units, with an ETA.
pub fn count_bar(len: u64, show: bool, prefix: &'static str) -> ProgressBar {
    styled(
        len,
        show,
        prefix,
        "{prefix:>10} [{elapsed_precise}] {wide_bar} {pos}/{len} ({per_sec}, eta {eta}) {msg}",
    )
}

/// Bar over the bytes of a file being scanned.
pub fn bytes_bar(len: u64, show: bool, prefix: &'static str) -> ProgressBar {
    styled(
        len,
        show,
        prefix,
        "{prefix:>10} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {msg}",
    )
}

fn styled(len: u64, show: bool, prefix: &'static str, template: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len).with_prefix(prefix);
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Last reported state of one search worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    /// Candidate pairs looked at so far.
    pub processed: u64,
    /// Candidate pairs in the worker's current unit.
    pub total: u64,
    pub best_area: u64,
    /// Pairs per second since the worker started.
    pub rate: f64,
    pub activity: String,
    pub current: Option<Rect>,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let activity = if self.activity.is_empty() {
            "starting"
        } else {
            &self.activity
        };
        write!(
            f,
            "{activity}: {} checked, {} in unit, {:.0}/s, best {}",
            self.processed, self.total, self.rate, self.best_area
        )?;
        if let Some(rect) = self.current {
            write!(f, ", at {rect}")?;
        }
        Ok(())
    }
}

/// One status line per search worker, drawn under the overall bar.
pub struct WorkerLines {
    multi: MultiProgress,
    lines: BTreeMap<usize, ProgressBar>,
}

impl WorkerLines {
    pub fn new(show: bool) -> Self {
        let multi = if show {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            multi,
            lines: BTreeMap::new(),
        }
    }

    /// Draws `bar` above the worker lines.
    pub fn add(&self, bar: ProgressBar) -> ProgressBar {
        self.multi.insert(0, bar)
    }

    /// Copies every worker's last status from `board` onto its line.
    pub fn refresh(&mut self, board: &ProgressBoard) {
        for (id, status) in board.snapshot() {
            let line = self.lines.entry(id).or_insert_with(|| {
                let line = self
                    .multi
                    .add(ProgressBar::new_spinner().with_prefix(format!("worker {id}")));
                if let Ok(style) = ProgressStyle::with_template("{prefix:>10} {spinner} {msg}") {
                    line.set_style(style);
                }
                line
            });
            line.set_message(status.to_string());
            line.tick();
            tracing::debug!(worker = id, %status, "worker progress");
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn message(&self, worker: usize) -> Option<String> {
        self.lines.get(&worker).map(|line| line.message())
    }

    pub fn clear(&self) {
        for line in self.lines.values() {
            line.finish_and_clear();
        }
    }
}

/// Telemetry shared between search workers and the reporting loop.
///
/// Workers overwrite their own slot every few seconds; only the orchestrator reads it.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    workers: Mutex<BTreeMap<usize, WorkerStatus>>,
    units_done: AtomicUsize,
    units_total: AtomicUsize,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, worker: usize, status: WorkerStatus) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.insert(worker, status);
        }
    }

    pub fn snapshot(&self) -> Vec<(usize, WorkerStatus)> {
        self.workers
            .lock()
            .map(|workers| workers.iter().map(|(&id, s)| (id, s.clone())).collect())
            .unwrap_or_default()
    }

    pub fn set_units(&self, total: usize) {
        self.units_total.store(total, Ordering::Relaxed);
        self.units_done.store(0, Ordering::Relaxed);
    }

    pub fn unit_done(&self) {
        self.units_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn units(&self) -> (usize, usize) {
        (
            self.units_done.load(Ordering::Relaxed),
            self.units_total.load(Ordering::Relaxed),
        )
    }

    pub fn processed(&self) -> u64 {
        self.snapshot().iter().map(|(_, s)| s.processed).sum()
    }

    pub fn best_area(&self) -> u64 {
        self.snapshot()
            .iter()
            .map(|(_, s)| s.best_area)
            .max()
            .unwrap_or(0)
    }

    pub fn rate(&self) -> f64 {
        self.snapshot().iter().map(|(_, s)| s.rate).sum()
    }
}
