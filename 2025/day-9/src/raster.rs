use std::path::Path;

use bitvec::prelude::*;
use rayon::prelude::*;

use crate::config::RASTER_CHUNK_ROWS;
use crate::error::{Result, TheaterError};
use crate::guard::MemoryGuard;
use crate::polygon::{BoundingBox, EdgeSet, Polygon};
use crate::progress;
use crate::store::{MemoryRows, RowRecord, RowStore, RowStoreWriter};

/// A vertical edge seen by a rightward ray at height `y` when `lo <= y < hi`.
#[derive(Debug, Clone, Copy)]
struct Crossing {
    x: i64,
    lo: i64,
    hi: i64,
}

/// Rows of consecutive y produced together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChunk {
    /// Rows of the bounding box covered by this chunk, green or not.
    pub rows_scanned: u64,
    /// Non-empty rows, increasing y.
    pub records: Vec<RowRecord>,
}

/// Classifies every tile of a polygon's bounding box, one row at a time.
pub struct Rasterizer<'a> {
    polygon: &'a Polygon,
    edges: EdgeSet,
    crossings: Vec<Crossing>,
    bbox: BoundingBox,
}

impl<'a> Rasterizer<'a> {
    pub fn new(polygon: &'a Polygon) -> Self {
        let crossings = polygon
            .edges()
            .filter(|(a, b)| a.x == b.x && a.y != b.y)
            .map(|(a, b)| Crossing {
                x: a.x,
                lo: a.y.min(b.y),
                hi: a.y.max(b.y),
            })
            .collect();
        let edges = EdgeSet::new(polygon);
        tracing::debug!(boundary = edges.len(), "edge set computed");
        Self {
            polygon,
            edges,
            crossings,
            bbox: polygon.bounding_box(),
        }
    }

    pub fn polygon(&self) -> &Polygon {
        self.polygon
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    fn row_crossings(&self, y: i64) -> Vec<i64> {
        let mut xs = self
            .crossings
            .iter()
            .filter(|c| c.lo <= y && y < c.hi)
            .map(|c| c.x)
            .collect::<Vec<_>>();
        xs.sort_unstable();
        xs
    }

    /// Classifies row `y` into `buffer`, one bit per column of the bounding box.
    fn fill_row(&self, y: i64, buffer: &mut BitVec<u64, Lsb0>) -> Option<RowRecord> {
        buffer.fill(false);
        let crossings = self.row_crossings(y);

        // A tile is inside when an odd number of crossings lie strictly to its right.
        let mut passed = 0;
        for (i, x) in (self.bbox.min_x..=self.bbox.max_x).enumerate() {
            while passed < crossings.len() && crossings[passed] <= x {
                passed += 1;
            }
            let inside = (crossings.len() - passed) % 2 == 1;
            if inside || self.edges.contains(x, y) {
                buffer.set(i, true);
            }
        }

        if buffer.not_any() {
            return None;
        }
        let xs = buffer
            .iter_ones()
            .map(|i| self.bbox.min_x + i as i64)
            .collect();
        Some(RowRecord::new(y, xs))
    }

    fn row_buffer(&self) -> BitVec<u64, Lsb0> {
        bitvec![u64, Lsb0; 0; self.bbox.width() as usize]
    }

    /// The green tiles of a single row, if any.
    pub fn row(&self, y: i64) -> Option<RowRecord> {
        if !(self.bbox.min_y..=self.bbox.max_y).contains(&y) {
            return None;
        }
        self.fill_row(y, &mut self.row_buffer())
    }

    /// Rasterizes `chunk_rows` rows at a time in parallel, yielding chunks in increasing
    /// y so a sink can stream them without holding the grid.
    pub fn chunks(&self, chunk_rows: usize) -> impl Iterator<Item = RowChunk> + '_ {
        let chunk_rows = chunk_rows.max(1) as u64;
        let height = self.bbox.height();
        let chunk_count = height.div_ceil(chunk_rows);

        (0..chunk_count).map(move |chunk| {
            let first = chunk * chunk_rows;
            let rows_scanned = chunk_rows.min(height - first);
            let start = self.bbox.min_y + first as i64;

            let rows = (0..rows_scanned as usize)
                .into_par_iter()
                .map_init(
                    || self.row_buffer(),
                    |buffer, offset| self.fill_row(start + offset as i64, buffer),
                )
                .collect::<Vec<_>>();

            RowChunk {
                rows_scanned,
                records: rows.into_iter().flatten().collect(),
            }
        })
    }

    /// Every non-empty row in increasing y.
    pub fn rows(&self) -> impl Iterator<Item = RowRecord> + '_ {
        self.chunks(RASTER_CHUNK_ROWS)
            .flat_map(|chunk| chunk.records)
    }

    /// Holds the whole grid in memory, refusing grids over `budget` tiles.
    #[tracing::instrument(skip(self), fields(bbox = %self.bbox))]
    pub fn to_memory(&self, budget: u64) -> Result<MemoryRows> {
        let tiles = self.bbox.tiles();
        if tiles > budget {
            return Err(TheaterError::GridTooLarge { tiles, budget });
        }
        let rows = MemoryRows::from_records(self.rows());
        tracing::info!(rows = rows.len(), green = rows.tiles(), "grid rasterized in memory");
        Ok(rows)
    }

    /// Streams the grid into a Row Store at `path` and writes its index.
    ///
    /// Nothing is left at `path` if the memory guard trips or a write fails.
    #[tracing::instrument(skip(self, guard), fields(bbox = %self.bbox))]
    pub fn to_store(&self, path: &Path, guard: &MemoryGuard, show_progress: bool) -> Result<RowStore> {
        let mut writer = RowStoreWriter::create(path)?;
        let bar = progress::count_bar(self.bbox.height(), show_progress, "filling");

        for chunk in self.chunks(RASTER_CHUNK_ROWS) {
            guard.check()?;
            for record in &chunk.records {
                writer.append(record)?;
            }
            bar.inc(chunk.rows_scanned);
            bar.set_message(format!("{} green", writer.tiles()));
        }
        bar.finish_and_clear();

        writer.finish()
    }
}
