use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use super::index::parent_dir;
use super::{open_artifact, GreenRow, RowBackend, RowIndex, RowRecord, RowSource};
use crate::error::{Result, TheaterError};

const KIND: &str = "row store";

/// Appends rows to a Row Store, indexing them as they go.
///
/// Rows land in a temporary file beside the destination and only replace it in
/// [`RowStoreWriter::finish`]; dropping the writer early leaves nothing behind.
#[derive(Debug)]
pub struct RowStoreWriter {
    path: PathBuf,
    out: BufWriter<NamedTempFile>,
    offset: u64,
    index: RowIndex,
    last_y: Option<i64>,
    tiles: u64,
}

impl RowStoreWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tmp = NamedTempFile::new_in(parent_dir(&path))?;
        Ok(Self {
            path,
            out: BufWriter::new(tmp),
            offset: 0,
            index: RowIndex::default(),
            last_y: None,
            tiles: 0,
        })
    }

    pub fn append(&mut self, record: &RowRecord) -> Result<()> {
        if let Some(previous) = self.last_y {
            if record.y <= previous {
                return Err(TheaterError::UnorderedRow {
                    previous,
                    y: record.y,
                });
            }
        }
        let line = format!("{record}\n");
        self.out.write_all(line.as_bytes())?;
        self.index.insert(record.y, self.offset);
        self.offset += line.len() as u64;
        self.last_y = Some(record.y);
        self.tiles += record.xs.len() as u64;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.index.len()
    }

    pub fn tiles(&self) -> u64 {
        self.tiles
    }

    /// Moves the rows into place, then the sidecar index.
    ///
    /// Both files are complete before either moves, and the previous index is removed
    /// before the rows replace theirs. A failure part way leaves either the old pair or
    /// new rows with no index, never rows beside an index of other rows.
    pub fn finish(self) -> Result<RowStore> {
        let index_path = RowIndex::path_for(&self.path);
        let rows = self.out.into_inner().map_err(|e| e.into_error())?;
        let index = self.index.write_temp(&index_path)?;
        match fs::remove_file(&index_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        rows.persist(&self.path)?;
        index.persist(&index_path)?;
        tracing::info!(
            path = %self.path.display(),
            rows = self.index.len(),
            tiles = self.tiles,
            bytes = self.offset,
            "row store written"
        );
        Ok(RowStore {
            path: self.path,
            index: Arc::new(self.index),
        })
    }
}

/// A finished Row Store and its index, shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct RowStore {
    path: PathBuf,
    index: Arc<RowIndex>,
}

impl RowStore {
    /// Opens a store whose rows and index were generated earlier.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(TheaterError::missing(KIND, path, "fill"));
        }
        let index = RowIndex::load(&RowIndex::path_for(&path))?;
        Ok(Self {
            path,
            index: Arc::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    /// Opens a private handle on the rows.
    pub fn reader(&self) -> Result<RowStoreReader> {
        let file = open_artifact(&self.path, KIND, "fill")?;
        Ok(RowStoreReader {
            path: self.path.clone(),
            file: BufReader::new(file),
            index: Arc::clone(&self.index),
            line: String::new(),
        })
    }

    /// Streams every record of a Row Store file in file order with its byte offset.
    pub fn records(path: &Path) -> Result<RowRecords<BufReader<File>>> {
        let file = open_artifact(path, KIND, "fill")?;
        Ok(RowRecords::new(path, BufReader::new(file)))
    }
}

impl RowBackend for RowStore {
    type Source = RowStoreReader;

    fn open_source(&self) -> Result<RowStoreReader> {
        self.reader()
    }
}

#[derive(Debug)]
pub struct RowStoreReader {
    path: PathBuf,
    file: BufReader<File>,
    index: Arc<RowIndex>,
    line: String,
}

impl RowSource for RowStoreReader {
    fn load_row(&mut self, y: i64) -> Result<Option<GreenRow>> {
        let Some(offset) = self.index.offset(y) else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(offset))?;
        self.line.clear();
        self.file.read_line(&mut self.line)?;
        let record = RowRecord::parse(self.line.trim_end())
            .filter(|record| record.y == y)
            .ok_or_else(|| {
                TheaterError::malformed(KIND, &self.path, format!("byte {offset}"), self.line.trim_end())
            })?;
        Ok(Some(record.into_row()))
    }
}

/// Forward scan over a Row Store.
pub struct RowRecords<R> {
    path: PathBuf,
    reader: R,
    line: String,
    number: usize,
    offset: u64,
}

impl<R: BufRead> RowRecords<R> {
    pub fn new(path: &Path, reader: R) -> Self {
        Self {
            path: path.to_path_buf(),
            reader,
            line: String::new(),
            number: 0,
            offset: 0,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: BufRead> Iterator for RowRecords<R> {
    type Item = Result<(u64, RowRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        let read = match self.reader.read_line(&mut self.line) {
            Ok(0) => return None,
            Ok(read) => read,
            Err(e) => return Some(Err(e.into())),
        };
        self.number += 1;
        let offset = self.offset;
        self.offset += read as u64;
        Some(
            RowRecord::parse(self.line.trim_end())
                .map(|record| (offset, record))
                .ok_or_else(|| {
                    TheaterError::malformed(
                        KIND,
                        &self.path,
                        format!("line {}", self.number),
                        self.line.trim_end(),
                    )
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    fn sample_rows() -> Vec<RowRecord> {
        vec![
            RowRecord::new(1, vec![7, 8, 9, 10, 11]),
            RowRecord::new(3, vec![2, 3, 4]),
            RowRecord::new(4, vec![-1, 0]),
        ]
    }

    #[test]
    fn writes_rows_and_index() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        let mut writer = RowStoreWriter::create(&path)?;
        for record in sample_rows() {
            writer.append(&record)?;
        }
        assert_eq!(10, writer.tiles());
        let store = writer.finish()?;

        assert_eq!(
            "1:7,8,9,10,11\n3:2,3,4\n4:-1,0\n",
            fs::read_to_string(&path).map_err(TheaterError::from)?
        );
        assert_eq!(store.index(), &RowIndex::build(&path, false)?);
        assert_eq!(store.index(), &RowIndex::load(&RowIndex::path_for(&path))?);
        Ok(())
    }

    #[test]
    fn failed_finish_keeps_the_old_store() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        let mut writer = RowStoreWriter::create(&path)?;
        for record in sample_rows() {
            writer.append(&record)?;
        }
        writer.finish()?;

        // An index that cannot be replaced.
        let index_path = RowIndex::path_for(&path);
        fs::remove_file(&index_path).map_err(TheaterError::from)?;
        fs::create_dir(&index_path).map_err(TheaterError::from)?;

        let mut writer = RowStoreWriter::create(&path)?;
        writer.append(&RowRecord::new(0, vec![5]))?;
        assert!(writer.finish().is_err());

        assert_eq!(
            "1:7,8,9,10,11\n3:2,3,4\n4:-1,0\n",
            fs::read_to_string(&path).map_err(TheaterError::from)?
        );
        let mut left = fs::read_dir(dir.path())
            .map_err(TheaterError::from)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(TheaterError::from)?;
        left.sort();
        assert_eq!(vec!["grid.idx", "grid.rows"], left);
        Ok(())
    }

    #[test]
    fn rewriting_replaces_rows_and_index_together() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        let mut writer = RowStoreWriter::create(&path)?;
        for record in sample_rows() {
            writer.append(&record)?;
        }
        writer.finish()?;

        let mut writer = RowStoreWriter::create(&path)?;
        writer.append(&RowRecord::new(0, vec![5]))?;
        let store = writer.finish()?;

        let reopened = RowStore::open(&path)?;
        assert_eq!(store.index(), reopened.index());
        assert_eq!(1, reopened.index().len());
        assert_eq!(
            Some(GreenRow::from(vec![5])),
            reopened.open_source()?.load_row(0)?
        );
        Ok(())
    }

    #[test]
    fn loads_rows_by_y() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        let mut writer = RowStoreWriter::create(&path)?;
        for record in sample_rows() {
            writer.append(&record)?;
        }
        writer.finish()?;

        let store = RowStore::open(&path)?;
        let mut reader = store.reader()?;
        assert_eq!(Some(GreenRow::from(vec![-1, 0])), reader.load_row(4)?);
        assert_eq!(Some(GreenRow::from(vec![7, 8, 9, 10, 11])), reader.load_row(1)?);
        assert_eq!(None, reader.load_row(2)?);
        Ok(())
    }

    #[test]
    fn rejects_out_of_order_rows() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let mut writer = RowStoreWriter::create(dir.path().join("grid.rows"))?;
        writer.append(&RowRecord::new(5, vec![1]))?;
        assert!(matches!(
            writer.append(&RowRecord::new(5, vec![2])),
            Err(TheaterError::UnorderedRow { previous: 5, y: 5 })
        ));
        Ok(())
    }

    #[test]
    fn abandoned_writer_leaves_no_file() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        {
            let mut writer = RowStoreWriter::create(&path)?;
            writer.append(&RowRecord::new(0, vec![0, 1]))?;
        }
        assert!(!path.exists());
        assert_eq!(0, fs::read_dir(dir.path()).map_err(TheaterError::from)?.count());
        Ok(())
    }

    #[test]
    fn open_requires_fill_then_index() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        assert!(matches!(
            RowStore::open(&path),
            Err(TheaterError::MissingArtifact { step: "fill", .. })
        ));
        fs::write(&path, "0:0\n").map_err(TheaterError::from)?;
        assert!(matches!(
            RowStore::open(&path),
            Err(TheaterError::MissingArtifact {
                step: "build-index",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn scan_reports_offsets() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("grid.rows");
        fs::write(&path, "1:7\n2:7,8\nbad\n").map_err(TheaterError::from)?;
        let mut records = RowStore::records(&path)?;
        assert_eq!(0, records.next().unwrap()?.0);
        assert_eq!(4, records.next().unwrap()?.0);
        assert!(matches!(
            records.next(),
            Some(Err(TheaterError::MalformedRecord { .. }))
        ));
        assert!(records.next().is_none());
        Ok(())
    }
}
