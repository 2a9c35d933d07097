use std::collections::BTreeMap;
use std::sync::Arc;

use super::{GreenRow, RowBackend, RowRecord, RowSource};
use crate::error::Result;
use crate::polygon::BoundingBox;

/// Green rows held in memory, for grids small enough to skip the Row Store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRows {
    rows: Arc<BTreeMap<i64, GreenRow>>,
}

impl MemoryRows {
    pub fn from_records(records: impl IntoIterator<Item = RowRecord>) -> Self {
        let rows = records
            .into_iter()
            .filter(|record| !record.xs.is_empty())
            .map(|record| (record.y, record.into_row()))
            .collect();
        Self {
            rows: Arc::new(rows),
        }
    }

    pub fn row(&self, y: i64) -> Option<&GreenRow> {
        self.rows.get(&y)
    }

    /// Rows in increasing y.
    pub fn rows(&self) -> impl Iterator<Item = (i64, &GreenRow)> + '_ {
        self.rows.iter().map(|(&y, row)| (y, row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn tiles(&self) -> u64 {
        self.rows.values().map(|row| row.len() as u64).sum()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let (min_y, max_y) = match (self.rows.keys().next(), self.rows.keys().next_back()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return None,
        };
        let min_x = self.rows.values().filter_map(|row| row.first()).min()?;
        let max_x = self.rows.values().filter_map(|row| row.last()).max()?;
        Some(BoundingBox {
            min_x: *min_x,
            max_x: *max_x,
            min_y,
            max_y,
        })
    }
}

impl RowSource for MemoryRows {
    fn load_row(&mut self, y: i64) -> Result<Option<GreenRow>> {
        Ok(self.rows.get(&y).cloned())
    }
}

impl RowBackend for MemoryRows {
    type Source = MemoryRows;

    fn open_source(&self) -> Result<MemoryRows> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_spans_all_rows() {
        let rows = MemoryRows::from_records([
            RowRecord::new(1, vec![7, 8]),
            RowRecord::new(3, vec![2, 3]),
            RowRecord::new(5, vec![]),
        ]);
        assert_eq!(2, rows.len());
        assert_eq!(4, rows.tiles());
        assert_eq!(
            Some(BoundingBox {
                min_x: 2,
                max_x: 8,
                min_y: 1,
                max_y: 3
            }),
            rows.bounding_box()
        );
        assert_eq!(None, MemoryRows::default().bounding_box());
    }
}
