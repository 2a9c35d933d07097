use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tempfile::NamedTempFile;

use crate::config::MEMORY_CHECK_EVERY;
use crate::error::{Result, TheaterError};
use crate::guard::MemoryGuard;
use crate::polygon::{BoundingBox, Polygon, Vertex};
use crate::progress;
use crate::store::{MemoryRows, RowStore};

const KIND: &str = "corners";
const HEADER: &str = "# min_x,max_x,min_y,max_y";

/// Which tiles may serve as a rectangle's opposite corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CornerScope {
    /// Only the polygon's own vertices. Few corners, the puzzle's rule.
    #[default]
    Vertices,
    /// Every green tile. Exhaustive, and quadratic in the number of green tiles.
    Tiles,
}

/// What [`CornerSet::extract`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CornerSummary {
    pub bbox: BoundingBox,
    pub corners: u64,
}

/// Deduplicated corner candidates sorted by `(x, y)`, with their bounding box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CornerSet {
    bbox: BoundingBox,
    corners: Vec<Vertex>,
}

impl CornerSet {
    /// Sidecar path of the corners file for a Row Store file.
    pub fn path_for(rows: &Path) -> PathBuf {
        rows.with_extension("corners")
    }

    pub fn new(corners: impl IntoIterator<Item = Vertex>) -> Option<Self> {
        let corners = corners
            .into_iter()
            .sorted_unstable_by_key(|v| (v.x, v.y))
            .dedup()
            .collect::<Vec<_>>();
        let bbox = BoundingBox::around(corners.iter().copied())?;
        Some(Self { bbox, corners })
    }

    pub fn from_vertices(polygon: &Polygon) -> Self {
        let corners = polygon
            .vertices()
            .iter()
            .copied()
            .sorted_unstable_by_key(|v| (v.x, v.y))
            .dedup()
            .collect();
        Self {
            bbox: polygon.bounding_box(),
            corners,
        }
    }

    pub fn from_rows(rows: &MemoryRows) -> Option<Self> {
        Self::new(
            rows.rows()
                .flat_map(|(y, row)| row.iter().map(move |&x| Vertex::new(x, y))),
        )
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn corners(&self) -> &[Vertex] {
        &self.corners
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    /// Drops corners that cannot reach `min_area` with any partner inside the
    /// bounding box. The bounding box itself is kept.
    pub fn filter_for_min_area(&self, min_area: u64) -> Self {
        let b = self.bbox;
        let corners = self
            .corners
            .iter()
            .copied()
            .filter(|c| {
                let width = (c.x - b.min_x).max(b.max_x - c.x).unsigned_abs() + 1;
                let height = (c.y - b.min_y).max(b.max_y - c.y).unsigned_abs() + 1;
                width.saturating_mul(height) >= min_area
            })
            .collect();
        Self {
            bbox: self.bbox,
            corners,
        }
    }

    /// Writes every green tile of a Row Store to a corners file.
    ///
    /// Corners go to a temporary body first since the bounding box header is only
    /// known at the end; header and body are then joined into `corners`.
    #[tracing::instrument(skip(guard, show_progress))]
    pub fn extract(
        rows: &Path,
        corners: &Path,
        guard: &MemoryGuard,
        show_progress: bool,
    ) -> Result<CornerSummary> {
        let mut records = RowStore::records(rows)?;
        let total_bytes = std::fs::metadata(rows)?.len();
        let bar = progress::bytes_bar(total_bytes, show_progress, "corners");

        let dir = crate::store::parent_dir(corners);
        let mut body = BufWriter::new(NamedTempFile::new_in(dir)?);
        let mut bbox: Option<BoundingBox> = None;
        let mut count = 0u64;

        let mut scanned = 0usize;
        while let Some(record) = records.next() {
            let (_, record) = record?;
            if scanned % MEMORY_CHECK_EVERY == 0 {
                guard.check()?;
                bar.set_position(records.offset());
            }
            scanned += 1;
            for &x in &record.xs {
                writeln!(body, "{x},{}", record.y)?;
                let tile = Vertex::new(x, record.y);
                bbox = Some(match bbox {
                    Some(b) => b.including(tile),
                    None => BoundingBox {
                        min_x: x,
                        max_x: x,
                        min_y: record.y,
                        max_y: record.y,
                    },
                });
                count += 1;
            }
        }
        let bbox = bbox
            .ok_or_else(|| TheaterError::malformed("row store", rows, "end of file", "no rows"))?;

        guard.check()?;
        let mut body = body.into_inner().map_err(|e| e.into_error())?;
        body.as_file_mut().seek(SeekFrom::Start(0))?;

        let mut out = BufWriter::new(NamedTempFile::new_in(dir)?);
        writeln!(out, "{HEADER}")?;
        writeln!(out, "{bbox}")?;
        io::copy(&mut BufReader::new(body.as_file_mut()), &mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.persist(corners)?;
        bar.finish_and_clear();

        tracing::info!(corners = count, %bbox, path = %corners.display(), "corners extracted");
        Ok(CornerSummary {
            bbox,
            corners: count,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = crate::store::parent_dir(path);
        let mut out = BufWriter::new(NamedTempFile::new_in(dir)?);
        writeln!(out, "{HEADER}")?;
        writeln!(out, "{}", self.bbox)?;
        for c in &self.corners {
            writeln!(out, "{},{}", c.x, c.y)?;
        }
        out.into_inner().map_err(|e| e.into_error())?.persist(path)?;
        Ok(())
    }

    /// Reads only the bounding box header of a corners file.
    pub fn read_bounding_box(path: &Path) -> Result<BoundingBox> {
        let mut lines = BufReader::new(crate::store::open_artifact(path, KIND, "extract-corners")?).lines();
        read_header(path, &mut lines)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut lines = BufReader::new(crate::store::open_artifact(path, KIND, "extract-corners")?).lines();
        let bbox = read_header(path, &mut lines)?;

        let mut corners = Vec::new();
        for (number, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let corner = parse_pair(&line).ok_or_else(|| {
                TheaterError::malformed(KIND, path, format!("line {}", number + 3), &line)
            })?;
            corners.push(Vertex::new(corner.0, corner.1));
        }
        corners.sort_unstable_by_key(|v| (v.x, v.y));
        corners.dedup();

        tracing::debug!(corners = corners.len(), %bbox, "corners loaded");
        Ok(Self { bbox, corners })
    }
}

fn read_header(path: &Path, lines: &mut impl Iterator<Item = io::Result<String>>) -> Result<BoundingBox> {
    let comment = lines.next().transpose()?.unwrap_or_default();
    if !comment.starts_with('#') {
        return Err(TheaterError::malformed(KIND, path, "line 1", comment));
    }
    let header = lines.next().transpose()?.unwrap_or_default();
    let values = header
        .split(',')
        .map(|v| v.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>();
    match values.as_deref() {
        Some(&[min_x, max_x, min_y, max_y]) if min_x <= max_x && min_y <= max_y => Ok(BoundingBox {
            min_x,
            max_x,
            min_y,
            max_y,
        }),
        _ => Err(TheaterError::malformed(KIND, path, "line 2", header)),
    }
}

fn parse_pair(line: &str) -> Option<(i64, i64)> {
    let (x, y) = line.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}
