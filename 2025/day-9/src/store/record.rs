use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use itertools::Itertools;

/// One persisted row: `y:x1,x2,...` with the green columns strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub y: i64,
    pub xs: Vec<i64>,
}

impl RowRecord {
    pub fn new(y: i64, xs: Vec<i64>) -> Self {
        debug_assert!(xs.windows(2).all(|w| w[0] < w[1]), "row {y} is not sorted");
        Self { y, xs }
    }

    /// Parses a record line without its trailing newline. Unsorted, duplicated or empty
    /// column lists are rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let (y, xs) = line.split_once(':')?;
        let y = y.parse::<i64>().ok()?;
        let xs = xs
            .split(',')
            .map(|x| x.parse::<i64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return None;
        }
        Some(Self { y, xs })
    }

    /// True when the columns form one gap-free run.
    pub fn is_contiguous(&self) -> bool {
        match (self.xs.first(), self.xs.last()) {
            (Some(first), Some(last)) => (last - first) as usize + 1 == self.xs.len(),
            _ => false,
        }
    }

    pub fn into_row(self) -> GreenRow {
        GreenRow::from(self.xs)
    }
}

impl fmt::Display for RowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.y, self.xs.iter().join(","))
    }
}

/// Sorted green columns of a row, cheap to clone between caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreenRow(Arc<[i64]>);

impl GreenRow {
    #[inline]
    pub fn contains(&self, x: i64) -> bool {
        self.0.binary_search(&x).is_ok()
    }

    /// True when every column in `min_x..=max_x` is green.
    ///
    /// Columns are unique and sorted, so the run is complete exactly when the entry
    /// `max_x - min_x` places after `min_x` is `max_x`.
    #[inline]
    pub fn covers(&self, min_x: i64, max_x: i64) -> bool {
        let Ok(start) = self.0.binary_search(&min_x) else {
            return false;
        };
        let span = (max_x - min_x) as usize;
        self.0.get(start + span) == Some(&max_x)
    }
}

impl From<Vec<i64>> for GreenRow {
    fn from(xs: Vec<i64>) -> Self {
        Self(xs.into())
    }
}

impl Deref for GreenRow {
    type Target = [i64];

    fn deref(&self) -> &[i64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn formats_and_parses() {
        let record = RowRecord::new(3, vec![2, 3, 4, 7]);
        assert_eq!("3:2,3,4,7", record.to_string());
        assert_eq!(Some(record), RowRecord::parse("3:2,3,4,7"));
    }

    #[rstest]
    #[case("")]
    #[case("3")]
    #[case("3:")]
    #[case("x:1,2")]
    #[case("3:1,,2")]
    #[case("3:2,1")]
    #[case("3:1,1")]
    fn rejects_bad_lines(#[case] line: &str) {
        assert_eq!(None, RowRecord::parse(line));
    }

    #[test]
    fn contiguity() {
        assert!(RowRecord::new(0, vec![4, 5, 6]).is_contiguous());
        assert!(!RowRecord::new(0, vec![4, 6]).is_contiguous());
        assert!(!RowRecord::new(0, vec![]).is_contiguous());
    }

    #[rstest]
    #[case(2, 4, true)]
    #[case(2, 2, true)]
    #[case(7, 9, true)]
    #[case(2, 7, false)]
    #[case(1, 3, false)]
    #[case(8, 10, false)]
    fn covers_runs(#[case] min_x: i64, #[case] max_x: i64, #[case] expected: bool) {
        let row = GreenRow::from(vec![2, 3, 4, 7, 8, 9]);
        assert_eq!(expected, row.covers(min_x, max_x));
    }

    #[test]
    fn membership() {
        let row = GreenRow::from(vec![-3, 0, 5]);
        assert!(row.contains(-3));
        assert!(!row.contains(1));
        assert_eq!(3, row.len());
    }
}
