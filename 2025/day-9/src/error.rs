use std::path::PathBuf;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

pub type Result<T, E = TheaterError> = std::result::Result<T, E>;

/// Structural failures of the tile pipeline.
///
/// A rectangle that fails validation is not an error; only problems that make the
/// whole run meaningless end up here.
#[derive(Debug, Error, Diagnostic)]
pub enum TheaterError {
    #[error("failed to parse vertex list: {reason}")]
    #[diagnostic(code(theater::parse), help("expected one `x,y` integer pair per line"))]
    Parse {
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
        reason: String,
    },

    #[error("edge {index} from {from:?} to {to:?} is not axis-aligned")]
    #[diagnostic(
        code(theater::not_axis_aligned),
        help("consecutive vertices must share either their x or their y coordinate")
    )]
    NotAxisAligned {
        #[source_code]
        src: NamedSource<String>,
        #[label("this vertex breaks the edge")]
        span: SourceSpan,
        index: usize,
        from: (i64, i64),
        to: (i64, i64),
    },

    #[error("polygon has no vertices")]
    #[diagnostic(code(theater::empty_polygon))]
    EmptyPolygon,

    #[error("{kind} file `{}` not found", .path.display())]
    #[diagnostic(code(theater::missing_artifact))]
    MissingArtifact {
        kind: &'static str,
        path: PathBuf,
        step: &'static str,
        #[help]
        advice: String,
    },

    #[error("malformed {kind} record in `{}` at {at}: {content:?}", .path.display())]
    #[diagnostic(code(theater::malformed_record))]
    MalformedRecord {
        kind: &'static str,
        path: PathBuf,
        at: String,
        content: String,
    },

    #[error("row {y} written after row {previous}; rows must be appended in increasing y")]
    #[diagnostic(code(theater::unordered_row))]
    UnorderedRow { previous: i64, y: i64 },

    #[error("only {available_mib} MiB of memory available, below the {floor_mib} MiB floor")]
    #[diagnostic(
        code(theater::low_memory),
        help("partial output was removed; free memory or lower the floor and rerun")
    )]
    LowMemory { available_mib: u64, floor_mib: u64 },

    #[error("grid of {tiles} tiles exceeds the in-memory budget of {budget} tiles")]
    #[diagnostic(
        code(theater::grid_too_large),
        help("run `tiles solve --strategy streaming`, which keeps rows on disk")
    )]
    GridTooLarge { tiles: u64, budget: u64 },

    #[error("worker could not open its row source: {reason}")]
    #[diagnostic(code(theater::worker_init))]
    WorkerInit { reason: String },

    #[error(transparent)]
    #[diagnostic(code(theater::io))]
    Io(#[from] std::io::Error),

    #[error("failed to move finished file into place")]
    #[diagnostic(code(theater::persist))]
    Persist(#[from] tempfile::PersistError),
}

impl TheaterError {
    pub(crate) fn missing(kind: &'static str, path: impl Into<PathBuf>, step: &'static str) -> Self {
        Self::MissingArtifact {
            kind,
            path: path.into(),
            step,
            advice: format!("run `{step}` first"),
        }
    }

    pub(crate) fn malformed(
        kind: &'static str,
        path: impl Into<PathBuf>,
        at: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            kind,
            path: path.into(),
            at: at.into(),
            content: content.into(),
        }
    }
}
