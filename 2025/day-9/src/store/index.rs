use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tempfile::NamedTempFile;

use super::open_artifact;
use crate::error::{Result, TheaterError};
use crate::progress;

const KIND: &str = "row index";

/// Byte offset of every row's line in a Row Store file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    offsets: HashMap<i64, u64>,
}

impl RowIndex {
    /// Sidecar path of the index for a Row Store file.
    pub fn path_for(rows: &Path) -> PathBuf {
        rows.with_extension("idx")
    }

    /// Records a row. Returns `false` if `y` was already indexed.
    pub fn insert(&mut self, y: i64, offset: u64) -> bool {
        self.offsets.insert(y, offset).is_none()
    }

    #[inline]
    pub fn offset(&self, y: i64) -> Option<u64> {
        self.offsets.get(&y).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Indexed rows in increasing y.
    pub fn rows(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.offsets.iter().map(|(&y, &o)| (y, o)).sorted_unstable()
    }

    /// Derives the index by scanning a Row Store once.
    #[tracing::instrument(skip(show_progress))]
    pub fn build(rows: &Path, show_progress: bool) -> Result<Self> {
        let file = open_artifact(rows, "row store", "fill")?;
        let bar = progress::bytes_bar(file.metadata()?.len(), show_progress, "indexing");
        let mut reader = BufReader::new(file);

        let mut index = Self::default();
        let mut line = String::new();
        let mut offset = 0u64;
        let mut number = 0usize;
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            number += 1;
            let y = line
                .split_once(':')
                .and_then(|(y, _)| y.parse::<i64>().ok())
                .ok_or_else(|| {
                    TheaterError::malformed("row store", rows, format!("line {number}"), line.trim_end())
                })?;
            if !index.insert(y, offset) {
                return Err(TheaterError::malformed(
                    "row store",
                    rows,
                    format!("line {number}"),
                    format!("duplicate row {y}"),
                ));
            }
            offset += read as u64;
            bar.set_position(offset);
        }
        bar.finish_and_clear();

        tracing::info!(rows = index.len(), "row index built");
        Ok(index)
    }

    /// Writes `y:offset` lines in increasing y.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.write_temp(path)?.persist(path)?;
        Ok(())
    }

    /// Writes the index to a temporary file beside `path` without moving it there.
    pub(crate) fn write_temp(&self, path: &Path) -> Result<NamedTempFile> {
        let tmp = NamedTempFile::new_in(parent_dir(path))?;
        let mut out = BufWriter::new(tmp);
        for (y, offset) in self.rows() {
            writeln!(out, "{y}:{offset}")?;
        }
        Ok(out.into_inner().map_err(|e| e.into_error())?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = open_artifact(path, KIND, "build-index")?;
        let mut index = Self::default();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry = line
                .split_once(':')
                .and_then(|(y, o)| Some((y.parse::<i64>().ok()?, o.parse::<u64>().ok()?)));
            let malformed = || TheaterError::malformed(KIND, path, format!("line {}", number + 1), &line);
            let (y, offset) = entry.ok_or_else(malformed)?;
            if !index.insert(y, offset) {
                return Err(malformed());
            }
        }
        tracing::debug!(rows = index.len(), "row index loaded");
        Ok(index)
    }
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scans_offsets() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let rows = dir.path().join("grid.rows");
        fs::write(&rows, "1:7,8\n3:2,3,4\n10:5\n").map_err(TheaterError::from)?;

        let index = RowIndex::build(&rows, false)?;
        assert_eq!(vec![(1, 0), (3, 6), (10, 14)], index.rows().collect::<Vec<_>>());
        assert_eq!(None, index.offset(2));
        Ok(())
    }

    #[test]
    fn save_and_load_agree() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.idx");
        let mut index = RowIndex::default();
        index.insert(-4, 0);
        index.insert(9, 120);
        index.save(&path)?;

        assert_eq!("-4:0\n9:120\n", fs::read_to_string(&path).map_err(TheaterError::from)?);
        assert_eq!(index, RowIndex::load(&path)?);
        Ok(())
    }

    #[test]
    fn duplicate_rows_are_malformed() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let rows = dir.path().join("grid.rows");
        fs::write(&rows, "1:7\n1:8\n").map_err(TheaterError::from)?;
        assert!(matches!(
            RowIndex::build(&rows, false),
            Err(TheaterError::MalformedRecord { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_index_names_the_step() {
        let err = RowIndex::load(Path::new("/nonexistent/grid.idx")).unwrap_err();
        assert!(matches!(
            err,
            TheaterError::MissingArtifact {
                step: "build-index",
                ..
            }
        ));
    }
}
