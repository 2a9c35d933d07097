//! The stages from a vertex list to the largest green rectangle.
//!
//! On disk every stage reads what the previous one wrote and fails with the name of
//! that stage when its artifact is missing:
//!
//! ```text
//! input.txt --fill--> input.rows + input.idx --extract-corners--> input.corners --search--> rectangle
//! ```
//!
//! `build-index` rebuilds `input.idx` from `input.rows` alone.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{PipelineConfig, Strategy};
use crate::corners::{CornerScope, CornerSet, CornerSummary};
use crate::error::{Result, TheaterError};
use crate::parallel::StopToken;
use crate::polygon::Polygon;
use crate::progress::ProgressBoard;
use crate::raster::Rasterizer;
use crate::search::{RectangleSearch, SearchOutcome};
use crate::store::{RowIndex, RowStore};

/// Where each stage keeps its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub rows: PathBuf,
    pub index: PathBuf,
    pub corners: PathBuf,
}

impl ArtifactPaths {
    /// Artifacts next to a vertex list: `input.txt` gives `input.rows`, `input.idx`
    /// and `input.corners`.
    pub fn for_input(input: &Path) -> Self {
        Self::for_rows(&input.with_extension("rows"))
    }

    pub fn for_rows(rows: &Path) -> Self {
        Self {
            rows: rows.to_path_buf(),
            index: RowIndex::path_for(rows),
            corners: CornerSet::path_for(rows),
        }
    }
}

pub fn read_polygon(input: &Path) -> Result<Polygon> {
    let text = fs::read_to_string(input)?;
    Polygon::parse_named(&input.display().to_string(), &text)
}

/// `fill`: rasterizes the vertex list into a Row Store and its index.
#[tracing::instrument(skip(config))]
pub fn fill_tiles(input: &Path, paths: &ArtifactPaths, config: &PipelineConfig) -> Result<RowStore> {
    let polygon = read_polygon(input)?;
    Rasterizer::new(&polygon).to_store(&paths.rows, &config.memory, config.show_progress())
}

/// `build-index`: rescans the Row Store and rewrites its index.
#[tracing::instrument]
pub fn build_index(paths: &ArtifactPaths, show_progress: bool) -> Result<RowIndex> {
    let index = RowIndex::build(&paths.rows, show_progress)?;
    index.save(&paths.index)?;
    Ok(index)
}

/// `extract-corners`: every green tile of the Row Store becomes a corner candidate.
#[tracing::instrument(skip(config))]
pub fn extract_corners(paths: &ArtifactPaths, config: &PipelineConfig) -> Result<CornerSummary> {
    if !paths.rows.exists() {
        return Err(TheaterError::missing("row store", &paths.rows, "fill"));
    }
    CornerSet::extract(&paths.rows, &paths.corners, &config.memory, config.show_progress())
}

/// `search`: the largest valid rectangle over the extracted corners.
#[tracing::instrument(skip(config, stop, board))]
pub fn find_rectangle(
    paths: &ArtifactPaths,
    config: &PipelineConfig,
    stop: &StopToken,
    board: &ProgressBoard,
) -> Result<SearchOutcome> {
    let store = RowStore::open(&paths.rows)?;
    let corners = CornerSet::load(&paths.corners)?;
    RectangleSearch::new(config.search.clone()).run_with_board(&corners, &store, stop, board)
}

/// The whole search without touching the disk. Refuses grids over the in-memory budget.
#[tracing::instrument(skip_all, fields(vertices = polygon.vertices().len(), scope = ?config.scope))]
pub fn solve_in_memory(polygon: &Polygon, config: &PipelineConfig, stop: &StopToken) -> Result<SearchOutcome> {
    let rows = Rasterizer::new(polygon).to_memory(config.max_in_memory_tiles)?;
    let corners = match config.scope {
        CornerScope::Vertices => Some(CornerSet::from_vertices(polygon)),
        CornerScope::Tiles => CornerSet::from_rows(&rows),
    };
    let Some(corners) = corners else {
        return Ok(SearchOutcome::default());
    };
    RectangleSearch::new(config.search.clone()).run(&corners, &rows, stop)
}

/// Runs every stage on a vertex list with the configured strategy.
#[tracing::instrument(skip(config, stop), fields(strategy = ?config.strategy))]
pub fn solve_file(input: &Path, config: &PipelineConfig, stop: &StopToken) -> Result<SearchOutcome> {
    match config.strategy {
        Strategy::InMemory => solve_in_memory(&read_polygon(input)?, config, stop),
        Strategy::Streaming => {
            let paths = ArtifactPaths::for_input(input);
            let polygon = read_polygon(input)?;
            Rasterizer::new(&polygon).to_store(&paths.rows, &config.memory, config.show_progress())?;
            match config.scope {
                CornerScope::Vertices => CornerSet::from_vertices(&polygon).save(&paths.corners)?,
                CornerScope::Tiles => {
                    extract_corners(&paths, config)?;
                }
            }
            find_rectangle(&paths, config, stop, &ProgressBoard::new())
        }
    }
}
