use std::time::{Duration, Instant};

use super::{Rect, Sampler};
use crate::config::{SearchConfig, Validation};
use crate::error::Result;
use crate::parallel::StopToken;
use crate::store::{RowCache, RowSource};

/// Rows between two reads of the clock in the exhaustive phase.
const CLOCK_EVERY_ROWS: i64 = 64;

/// Why a rectangle was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// One of the two corners not supplied by the pair is not green.
    Precheck,
    /// A sampled tile is not green.
    Sampled,
    /// A row of the rectangle is not fully green.
    Exhaustive,
    /// Confirmation exceeded the per-rectangle time budget.
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Rejected(Rejection),
}

/// Decides whether every tile of a rectangle is green.
///
/// Owns one worker's row source and cache. Sampling can only reject; a rectangle is
/// accepted by the row-by-row check alone.
pub struct Validator<S> {
    source: S,
    cache: RowCache,
    sampler: Sampler,
    validation: Validation,
    budget: Option<Duration>,
    stop: StopToken,
}

impl<S: RowSource> Validator<S> {
    pub fn new(source: S, config: &SearchConfig, stop: StopToken) -> Self {
        Self::with_seed(source, config, config.seed, stop)
    }

    /// Like [`Validator::new`] with a different sampling seed, one per worker.
    pub fn with_seed(source: S, config: &SearchConfig, seed: u64, stop: StopToken) -> Self {
        Self {
            source,
            cache: RowCache::new(config.cache),
            sampler: Sampler::new(seed),
            validation: config.validation,
            budget: config.rect_time_budget,
            stop,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// `(hits, misses)` of the row cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.hits(), self.cache.misses())
    }

    pub fn is_green(&mut self, x: i64, y: i64) -> Result<bool> {
        Ok(self
            .cache
            .get_or_load(y, &mut self.source)?
            .is_some_and(|row| row.contains(x)))
    }

    pub fn validate(&mut self, rect: &Rect) -> Result<Verdict> {
        if !self.is_green(rect.min_x, rect.max_y)? || !self.is_green(rect.max_x, rect.min_y)? {
            return Ok(Verdict::Rejected(Rejection::Precheck));
        }
        if self.validation == Validation::Sampled && self.sample_rejects(rect)? {
            return Ok(Verdict::Rejected(Rejection::Sampled));
        }
        self.confirm(rect)
    }

    /// Phase 1: `true` when a random tile of `rect` is not green.
    pub fn sample_rejects(&mut self, rect: &Rect) -> Result<bool> {
        for point in self.sampler.sample(rect) {
            if !self.is_green(point.x, point.y)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Phase 2: every row of `rect` must hold one green run from `min_x` to `max_x`.
    pub fn confirm(&mut self, rect: &Rect) -> Result<Verdict> {
        let started = Instant::now();
        for y in rect.min_y..=rect.max_y {
            if self.stop.is_stopped() {
                return Ok(Verdict::Rejected(Rejection::Cancelled));
            }
            if let Some(budget) = self.budget {
                if (y - rect.min_y) % CLOCK_EVERY_ROWS == 0 && started.elapsed() >= budget {
                    tracing::warn!(%rect, ?budget, "rectangle check over budget, skipping");
                    return Ok(Verdict::Rejected(Rejection::TimedOut));
                }
            }
            let covered = self
                .cache
                .get_or_load(y, &mut self.source)?
                .is_some_and(|row| row.covers(rect.min_x, rect.max_x));
            if !covered {
                return Ok(Verdict::Rejected(Rejection::Exhaustive));
            }
        }
        Ok(Verdict::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use rstest::rstest;

    use crate::polygon::tests::{flood_reference, FIXTURE, STAIRS};
    use crate::polygon::Polygon;
    use crate::raster::Rasterizer;
    use crate::store::MemoryRows;

    fn green_rows(input: &str) -> (Polygon, MemoryRows) {
        let polygon = Polygon::parse(input).unwrap();
        let rows = Rasterizer::new(&polygon).to_memory(u64::MAX).unwrap();
        (polygon, rows)
    }

    fn rect(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Rect {
        Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[rstest]
    #[case(rect(2, 3, 9, 5), Verdict::Valid)]
    #[case(rect(2, 3, 11, 5), Verdict::Valid)]
    #[case(rect(7, 1, 11, 5), Verdict::Valid)]
    #[case(rect(2, 1, 11, 5), Verdict::Rejected(Rejection::Exhaustive))]
    #[case(rect(2, 3, 11, 7), Verdict::Rejected(Rejection::Precheck))]
    #[case(rect(7, 3, 11, 7), Verdict::Rejected(Rejection::Precheck))]
    fn fixture_verdicts(#[case] candidate: Rect, #[case] expected: Verdict) {
        let (_, rows) = green_rows(FIXTURE);
        for validation in [Validation::Exhaustive, Validation::Sampled] {
            let config = SearchConfig::default().with_validation(validation);
            let mut validator = Validator::new(rows.clone(), &config, StopToken::new());
            assert_eq!(expected, validator.validate(&candidate).unwrap(), "{validation:?}");
        }
    }

    #[test]
    fn stop_cancels_confirmation() {
        let (_, rows) = green_rows(STAIRS);
        let stop = StopToken::new();
        let mut validator = Validator::new(rows, &SearchConfig::default(), stop.clone());
        stop.stop();
        assert_eq!(
            Verdict::Rejected(Rejection::Cancelled),
            validator.confirm(&rect(0, 0, 3, 9)).unwrap()
        );
    }

    #[test]
    fn zero_budget_times_out() {
        let (_, rows) = green_rows(STAIRS);
        let config = SearchConfig {
            rect_time_budget: Some(Duration::ZERO),
            ..Default::default()
        };
        let mut validator = Validator::new(rows, &config, StopToken::new());
        assert_eq!(
            Verdict::Rejected(Rejection::TimedOut),
            validator.confirm(&rect(0, 0, 3, 9)).unwrap()
        );
    }

    #[test]
    fn rows_are_cached_across_checks() {
        let (_, rows) = green_rows(FIXTURE);
        let mut validator = Validator::new(rows, &SearchConfig::default(), StopToken::new());
        validator.validate(&rect(2, 3, 9, 5)).unwrap();
        validator.validate(&rect(2, 3, 11, 5)).unwrap();
        let (hits, misses) = validator.cache_stats();
        assert_eq!(3, misses);
        assert!(hits > 0);
    }

    const WIDE_STAIRS: &str = "0,0\n90,0\n90,30\n60,30\n60,60\n30,60\n30,90\n0,90";
    const WIDE_U: &str = "0,0\n80,0\n80,60\n60,60\n60,20\n20,20\n20,60\n0,60";

    proptest! {
        #[test]
        fn sampling_only_ever_rejects(
            seed in any::<u64>(),
            input in prop::sample::select(vec![WIDE_STAIRS, WIDE_U]),
            xs in (0i64..=95, 0i64..=95),
            ys in (0i64..=95, 0i64..=95),
        ) {
            let r = rect(xs.0.min(xs.1), ys.0.min(ys.1), xs.0.max(xs.1), ys.0.max(ys.1));
            let (polygon, rows) = green_rows(input);
            let green = flood_reference(&polygon);
            let truth = (r.min_y..=r.max_y)
                .all(|y| (r.min_x..=r.max_x).all(|x| green.contains(&(x, y))));

            let config = SearchConfig { seed, ..SearchConfig::default() };
            let mut validator = Validator::new(rows, &config, StopToken::new());
            prop_assert!(!(truth && validator.sample_rejects(&r).unwrap()), "sampling rejected green {}", r);
            prop_assert_eq!(truth, validator.validate(&r).unwrap() == Verdict::Valid, "{}", r);
        }
    }
}
