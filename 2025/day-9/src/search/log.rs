use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{Candidate, Rect};
use crate::error::{Result, TheaterError};

const KIND: &str = "best log";
const HEADER: &str = "# area,min_x,min_y,max_x,max_y";

/// Append-only record of every rectangle that raised the best area of a search.
///
/// Each line is written and flushed as soon as it is found, so a run that dies still
/// leaves its best area behind to restart from with a higher threshold.
#[derive(Debug)]
pub struct BestLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl BestLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{HEADER}")?;
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raises `best` to the candidate's area and logs the candidate when that is an
    /// improvement. Returns `true` when a line was written.
    ///
    /// Raising and writing happen under one lock, so logged areas only ever increase.
    pub fn offer(&self, best: &AtomicU64, candidate: &Candidate) -> Result<bool> {
        let Ok(mut file) = self.file.lock() else {
            best.fetch_max(candidate.area, Ordering::Relaxed);
            return Ok(false);
        };
        if best.fetch_max(candidate.area, Ordering::Relaxed) >= candidate.area {
            return Ok(false);
        }
        let Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        } = candidate.rect;
        let line = format!("{},{min_x},{min_y},{max_x},{max_y}\n", candidate.area);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        tracing::info!(area = candidate.area, rect = %candidate.rect, "new best logged");
        Ok(true)
    }

    /// The last rectangle recorded in a log, if the log exists and holds one.
    pub fn last(path: &Path) -> Result<Option<Candidate>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut last = None;
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let candidate = parse_line(&line).ok_or_else(|| {
                TheaterError::malformed(KIND, path, format!("line {}", number + 1), &line)
            })?;
            last = Some(candidate);
        }
        Ok(last)
    }
}

fn parse_line(line: &str) -> Option<Candidate> {
    let values = line
        .split(',')
        .map(|v| v.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let &[area, min_x, min_y, max_x, max_y] = values.as_slice() else {
        return None;
    };
    let candidate = Candidate::new(Rect {
        min_x,
        min_y,
        max_x,
        max_y,
    });
    (min_x <= max_x && min_y <= max_y && i64::try_from(candidate.area).ok() == Some(area))
        .then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    fn candidate(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Candidate {
        Candidate::new(Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    #[test]
    fn logs_only_improvements() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("best.log");
        let log = BestLog::open(&path)?;
        let best = AtomicU64::new(0);

        assert!(log.offer(&best, &candidate(2, 3, 7, 5))?);
        assert!(!log.offer(&best, &candidate(0, 0, 1, 1))?);
        assert!(!log.offer(&best, &candidate(10, 3, 15, 5))?);
        assert!(log.offer(&best, &candidate(2, 3, 9, 5))?);
        assert_eq!(24, best.load(Ordering::Relaxed));

        assert_eq!(
            "# area,min_x,min_y,max_x,max_y\n18,2,3,7,5\n24,2,3,9,5\n",
            fs::read_to_string(&path).map_err(TheaterError::from)?
        );
        assert_eq!(Some(candidate(2, 3, 9, 5)), BestLog::last(&path)?);
        Ok(())
    }

    #[test]
    fn reopening_appends() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("best.log");
        BestLog::open(&path)?.offer(&AtomicU64::new(0), &candidate(0, 0, 2, 2))?;
        BestLog::open(&path)?.offer(&AtomicU64::new(9), &candidate(0, 0, 3, 3))?;

        let text = fs::read_to_string(&path).map_err(TheaterError::from)?;
        assert_eq!(1, text.matches('#').count());
        assert_eq!(Some(candidate(0, 0, 3, 3)), BestLog::last(&path)?);
        Ok(())
    }

    #[test]
    fn missing_log_has_no_last() -> miette::Result<()> {
        assert_eq!(None, BestLog::last(Path::new("/nonexistent/best.log"))?);
        Ok(())
    }

    #[test]
    fn inconsistent_line_is_malformed() -> miette::Result<()> {
        let dir = TempDir::new().map_err(TheaterError::from)?;
        let path = dir.path().join("best.log");
        fs::write(&path, "# area,min_x,min_y,max_x,max_y\n25,2,3,9,5\n").map_err(TheaterError::from)?;
        assert!(matches!(
            BestLog::last(&path),
            Err(TheaterError::MalformedRecord { .. })
        ));
        Ok(())
    }
}
