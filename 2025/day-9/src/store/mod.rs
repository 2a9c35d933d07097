//! Paged, offset-indexed storage of green tile rows.
//!
//! A Row Store is a flat text file with one `y:x1,x2,...` line per non-empty row,
//! written once in increasing y and read-only afterwards. Its sidecar `.idx` file maps
//! every y to the byte offset of that line, so a single row can be read with one seek.

mod cache;
mod file;
mod index;
mod memory;
mod record;

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

pub use cache::{CachePolicy, RowCache};
pub use file::{RowRecords, RowStore, RowStoreReader, RowStoreWriter};
pub use index::RowIndex;
pub(crate) use index::parent_dir;
pub use memory::MemoryRows;
pub use record::{GreenRow, RowRecord};

use crate::error::{Result, TheaterError};

/// Random access to green rows. `None` means the row has no green tiles.
pub trait RowSource {
    fn load_row(&mut self, y: i64) -> Result<Option<GreenRow>>;
}

/// Shared rows from which every worker opens its own [`RowSource`].
pub trait RowBackend: Sync {
    type Source: RowSource + Send;

    fn open_source(&self) -> Result<Self::Source>;
}

/// Opens a pipeline artifact, turning "not found" into an error naming the step that
/// produces it.
pub(crate) fn open_artifact(path: &Path, kind: &'static str, step: &'static str) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TheaterError::missing(kind, path, step),
        _ => TheaterError::Io(e),
    })
}
