//! Largest all-green rectangle with two corner candidates as opposite corners.
//!
//! Candidates are validated best first, so the first one that passes in a batch of
//! pairs is that batch's answer. [`Candidate`]'s ordering is total and encodes the
//! tie-break, which makes every merge of partial results a plain `max`.

mod log;
mod sample;
mod validate;

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use itertools::{iproduct, Itertools};

pub use log::BestLog;
pub use sample::Sampler;
pub use validate::{Rejection, Validator, Verdict};

use crate::config::SearchConfig;
use crate::corners::CornerSet;
use crate::error::Result;
use crate::parallel::{Distributor, StopToken};
use crate::polygon::Vertex;
use crate::progress::ProgressBoard;
use crate::store::{RowBackend, RowSource};

/// Inclusive rectangle of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rect {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Rect {
    /// The rectangle spanned by two opposite corners. Corners sharing a column or a row
    /// span no rectangle.
    pub fn from_corners(a: Vertex, b: Vertex) -> Option<Self> {
        if a.x == b.x || a.y == b.y {
            return None;
        }
        Some(Self {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        })
    }

    pub fn width(&self) -> u64 {
        (self.max_x - self.min_x).unsigned_abs() + 1
    }

    pub fn height(&self) -> u64 {
        (self.max_y - self.min_y).unsigned_abs() + 1
    }

    /// Number of tiles, which is also the area.
    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    pub fn contains(&self, p: Vertex) -> bool {
        (self.min_x..=self.max_x).contains(&p.x) && (self.min_y..=self.max_y).contains(&p.y)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// A rectangle waiting for validation, ordered by how much we want it.
///
/// Larger areas are greater. Among equal areas the lexicographically smaller
/// rectangle is greater, so `max` always picks the same winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub area: u64,
    pub rect: Rect,
}

impl Candidate {
    pub fn new(rect: Rect) -> Self {
        Self {
            area: rect.area(),
            rect,
        }
    }

    pub fn from_corners(a: Vertex, b: Vertex) -> Option<Self> {
        Rect::from_corners(a, b).map(Self::new)
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.area
            .cmp(&other.area)
            .then_with(|| other.rect.cmp(&self.rect))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps candidates inside `[min_area, max_area]`.
#[derive(Debug, Clone, Copy)]
pub struct AreaFilter {
    pub min_area: u64,
    pub max_area: Option<u64>,
}

impl AreaFilter {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            min_area: config.min_area,
            max_area: config.max_area,
        }
    }

    #[inline]
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        candidate.area >= self.min_area && self.max_area.is_none_or(|max| candidate.area <= max)
    }
}

/// Every pair within one corner slice, best first.
pub fn candidates_within(corners: &[Vertex], filter: AreaFilter) -> Vec<Candidate> {
    sorted(
        corners
            .iter()
            .tuple_combinations()
            .filter_map(|(&a, &b)| Candidate::from_corners(a, b)),
        filter,
    )
}

/// Every pair with one corner from each slice, best first.
pub fn candidates_between(left: &[Vertex], right: &[Vertex], filter: AreaFilter) -> Vec<Candidate> {
    sorted(
        iproduct!(left, right).filter_map(|(&a, &b)| Candidate::from_corners(a, b)),
        filter,
    )
}

fn sorted(pairs: impl Iterator<Item = Candidate>, filter: AreaFilter) -> Vec<Candidate> {
    let mut candidates = pairs.filter(|c| filter.accepts(c)).collect::<Vec<_>>();
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    candidates
}

/// The largest rectangle between any two corners, green or not.
#[tracing::instrument(skip(corners), fields(corners = corners.len()))]
pub fn largest_unconstrained(corners: &[Vertex]) -> Option<Candidate> {
    corners
        .iter()
        .tuple_combinations()
        .filter_map(|(&a, &b)| Candidate::from_corners(a, b))
        .max()
}

/// Best valid rectangle seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchState {
    best: Option<Candidate>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<Candidate> {
        self.best
    }

    /// Best area so far, 0 before anything was found.
    pub fn area(&self) -> u64 {
        self.best.map_or(0, |c| c.area)
    }

    /// Returns `true` when `candidate` became the new best.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        if self.best.is_some_and(|best| best >= candidate) {
            return false;
        }
        self.best = Some(candidate);
        true
    }

    pub fn merge(mut self, other: Self) -> Self {
        if let Some(candidate) = other.best {
            self.offer(candidate);
        }
        self
    }
}

/// Counters summed over every worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub units: u64,
    /// Units whose area bound could not beat the best at the time they were reached.
    pub units_skipped: u64,
    pub candidates: u64,
    /// Candidates never validated because a better rectangle was already known.
    pub pruned: u64,
    pub accepted: u64,
    pub rejected_precheck: u64,
    pub rejected_sampled: u64,
    pub rejected_exhaustive: u64,
    pub timed_out: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl SearchStats {
    pub fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Precheck => self.rejected_precheck += 1,
            Rejection::Sampled => self.rejected_sampled += 1,
            Rejection::Exhaustive => self.rejected_exhaustive += 1,
            Rejection::TimedOut => self.timed_out += 1,
            Rejection::Cancelled => {}
        }
    }

    /// Candidates that reached the validator.
    pub fn validated(&self) -> u64 {
        self.accepted
            + self.rejected_precheck
            + self.rejected_sampled
            + self.rejected_exhaustive
            + self.timed_out
    }
}

impl AddAssign for SearchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.units += rhs.units;
        self.units_skipped += rhs.units_skipped;
        self.candidates += rhs.candidates;
        self.pruned += rhs.pruned;
        self.accepted += rhs.accepted;
        self.rejected_precheck += rhs.rejected_precheck;
        self.rejected_sampled += rhs.rejected_sampled;
        self.rejected_exhaustive += rhs.rejected_exhaustive;
        self.timed_out += rhs.timed_out;
        self.cache_hits += rhs.cache_hits;
        self.cache_misses += rhs.cache_misses;
    }
}

impl Add for SearchStats {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

/// How a scan over one sorted candidate list ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Found(Candidate),
    /// Every candidate was rejected or pruned.
    Exhausted,
    Cancelled,
}

/// Validates `candidates` best first and stops at the first valid one.
///
/// `bound` is re-read before every candidate; once a candidate's area drops below it
/// the rest of the list cannot matter. `tick` is called before each validation.
pub fn first_valid<S: RowSource>(
    candidates: &[Candidate],
    validator: &mut Validator<S>,
    bound: impl Fn() -> u64,
    stats: &mut SearchStats,
    mut tick: impl FnMut(usize, &Candidate),
) -> Result<Scan> {
    for (i, candidate) in candidates.iter().enumerate() {
        if validator.is_stopped() {
            return Ok(Scan::Cancelled);
        }
        if candidate.area < bound() {
            stats.pruned += (candidates.len() - i) as u64;
            return Ok(Scan::Exhausted);
        }
        tick(i, candidate);
        match validator.validate(&candidate.rect)? {
            Verdict::Valid => {
                stats.accepted += 1;
                return Ok(Scan::Found(*candidate));
            }
            Verdict::Rejected(Rejection::Cancelled) => return Ok(Scan::Cancelled),
            Verdict::Rejected(rejection) => stats.record(rejection),
        }
    }
    Ok(Scan::Exhausted)
}

/// Result of one search run.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub best: Option<Candidate>,
    pub stats: SearchStats,
    /// The run was stopped early; `best` is the best found until then.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl SearchOutcome {
    pub fn area(&self) -> u64 {
        self.best.map_or(0, |c| c.area)
    }

    pub fn rect(&self) -> Option<Rect> {
        self.best.map(|c| c.rect)
    }
}

impl fmt::Display for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.best {
            Some(best) => write!(f, "largest rectangle: area {} at {}", best.area, best.rect)?,
            None => write!(f, "no valid rectangle found")?,
        }
        if self.cancelled {
            write!(f, " (stopped early)")?;
        }
        Ok(())
    }
}

/// Entry point of the search: corners in, best rectangle out.
#[derive(Debug, Clone)]
pub struct RectangleSearch {
    config: SearchConfig,
}

impl RectangleSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Searches with a fresh progress board.
    pub fn run<B: RowBackend>(&self, corners: &CornerSet, rows: &B, stop: &StopToken) -> Result<SearchOutcome> {
        self.run_with_board(corners, rows, stop, &ProgressBoard::new())
    }

    #[tracing::instrument(skip_all, fields(corners = corners.len(), min_area = self.config.min_area))]
    pub fn run_with_board<B: RowBackend>(
        &self,
        corners: &CornerSet,
        rows: &B,
        stop: &StopToken,
        board: &ProgressBoard,
    ) -> Result<SearchOutcome> {
        let corners = if self.config.min_area > 0 {
            let kept = corners.filter_for_min_area(self.config.min_area);
            tracing::debug!(before = corners.len(), after = kept.len(), "location filter applied");
            kept
        } else {
            corners.clone()
        };
        let outcome = Distributor::new(&self.config).run(corners.corners(), rows, stop, board)?;
        tracing::info!(
            area = outcome.area(),
            cancelled = outcome.cancelled,
            validated = outcome.stats.validated(),
            elapsed = ?outcome.elapsed,
            "search finished"
        );
        Ok(outcome)
    }
}
