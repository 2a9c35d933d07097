use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Rect;
use crate::config::{
    LARGE_RECT_POINTS, LARGE_SAMPLE, MEDIUM_SAMPLE, SMALL_RECT_POINTS, SMALL_SAMPLE,
};
use crate::polygon::Vertex;

/// Draws random tiles of a rectangle for phase 1 rejection.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sample size for a rectangle of `points` tiles.
    pub fn sample_size(points: u64) -> usize {
        if points < SMALL_RECT_POINTS {
            SMALL_SAMPLE
        } else if points <= LARGE_RECT_POINTS {
            MEDIUM_SAMPLE
        } else {
            LARGE_SAMPLE
        }
    }

    /// Random tiles of `rect`, sorted by row so consecutive lookups share cached rows.
    ///
    /// Empty when the sample would be as large as the rectangle itself; the exhaustive
    /// phase is cheaper then.
    pub fn sample(&mut self, rect: &Rect) -> Vec<Vertex> {
        let size = Self::sample_size(rect.area());
        if size as u64 >= rect.area() {
            return Vec::new();
        }
        let mut points = (0..size)
            .map(|_| {
                Vertex::new(
                    self.rng.random_range(rect.min_x..=rect.max_x),
                    self.rng.random_range(rect.min_y..=rect.max_y),
                )
            })
            .collect::<Vec<_>>();
        points.sort_unstable_by_key(|p| (p.y, p.x));
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(1, SMALL_SAMPLE)]
    #[case(99_999, SMALL_SAMPLE)]
    #[case(100_000, MEDIUM_SAMPLE)]
    #[case(10_000_000, MEDIUM_SAMPLE)]
    #[case(10_000_001, LARGE_SAMPLE)]
    fn size_scales_with_area(#[case] points: u64, #[case] expected: usize) {
        assert_eq!(expected, Sampler::sample_size(points));
    }

    #[test]
    fn points_stay_inside_and_sorted() {
        let rect = Rect {
            min_x: -50,
            min_y: 10,
            max_x: 449,
            max_y: 409,
        };
        let points = Sampler::new(7).sample(&rect);
        assert_eq!(MEDIUM_SAMPLE, points.len());
        assert!(points.iter().all(|p| rect.contains(*p)));
        assert!(points.windows(2).all(|w| (w[0].y, w[0].x) <= (w[1].y, w[1].x)));
    }

    #[test]
    fn small_rectangles_are_not_sampled() {
        let rect = Rect {
            min_x: 0,
            min_y: 0,
            max_x: 9,
            max_y: 9,
        };
        assert!(Sampler::new(7).sample(&rect).is_empty());
    }

    #[test]
    fn same_seed_same_points() {
        let rect = Rect {
            min_x: 0,
            min_y: 0,
            max_x: 999,
            max_y: 999,
        };
        assert_eq!(Sampler::new(3).sample(&rect), Sampler::new(3).sample(&rect));
    }
}
