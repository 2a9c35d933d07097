use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::config::{PipelineConfig, SearchConfig, Strategy, Validation};
use crate::corners::CornerScope;
use crate::error::Result;
use crate::guard::{MemoryGuard, DEFAULT_FLOOR_MIB};
use crate::parallel::StopToken;
use crate::pipeline::{self, ArtifactPaths};
use crate::progress::ProgressBoard;
use crate::search::BestLog;
use crate::store::CachePolicy;

/// Looked up in the working directory, in this order, when no input is given.
pub const DEFAULT_INPUTS: [&str; 3] = ["input.txt", "input2.txt", "input1.txt"];

/// Largest green rectangle inside a rectilinear tile polygon.
#[derive(Debug, Parser)]
#[command(name = "tiles", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub tuning: Tuning,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rasterize a vertex list into a Row Store and its index
    Fill(InputArgs),
    /// Rebuild the index of an existing Row Store
    BuildIndex(RowsArgs),
    /// Write every green tile of a Row Store as a corner candidate
    ExtractCorners(RowsArgs),
    /// Search the extracted corners of a Row Store
    Search(SearchArgs),
    /// Run every stage on a vertex list
    Solve(SolveArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Vertex list, one `x,y` per line [default: input.txt, input2.txt or input1.txt]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RowsArgs {
    /// Row Store file [default: derived from the default input]
    pub rows: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Row Store file [default: derived from the default input]
    pub rows: Option<PathBuf>,
    /// Ignore rectangles smaller than this
    pub min_area: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SolveArgs {
    /// Vertex list [default: input.txt, input2.txt or input1.txt]
    pub input: Option<PathBuf>,
    /// Ignore rectangles smaller than this
    pub min_area: Option<u64>,
    #[arg(long, value_enum, default_value_t = StrategyArg::InMemory)]
    pub strategy: StrategyArg,
    #[arg(long, value_enum, default_value_t = ScopeArg::Vertices)]
    pub scope: ScopeArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    InMemory,
    Streaming,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::InMemory => Strategy::InMemory,
            StrategyArg::Streaming => Strategy::Streaming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    /// Polygon vertices only
    Vertices,
    /// Every green tile
    Tiles,
}

impl From<ScopeArg> for CornerScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Vertices => CornerScope::Vertices,
            ScopeArg::Tiles => CornerScope::Tiles,
        }
    }
}

/// Knobs shared by every subcommand.
#[derive(Debug, Args)]
pub struct Tuning {
    /// Worker threads [default: one per core]
    #[arg(long, global = true)]
    pub workers: Option<usize>,
    /// Corner batches [default: four per worker]
    #[arg(long, global = true)]
    pub batches: Option<usize>,
    /// Skip rectangles larger than this
    #[arg(long, global = true)]
    pub max_area: Option<u64>,
    /// Check every row of every candidate instead of sampling first
    #[arg(long, global = true)]
    pub exhaustive: bool,
    /// Keep this many recently used rows per worker instead of clearing on overflow
    #[arg(long, global = true)]
    pub lru: Option<usize>,
    /// Give up on a single rectangle after this many seconds
    #[arg(long, global = true)]
    pub rect_budget_secs: Option<f64>,
    /// Abort when available memory drops below this many MiB (0 disables the check)
    #[arg(long, global = true, default_value_t = DEFAULT_FLOOR_MIB)]
    pub memory_floor_mib: u64,
    /// Hide progress bars
    #[arg(long, global = true)]
    pub quiet: bool,
    /// Append every new best rectangle to this file as `area,min_x,min_y,max_x,max_y`
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,
    /// Skip rectangles smaller than the last one recorded in the log
    #[arg(long, global = true, requires = "log")]
    pub resume: bool,
}

impl Tuning {
    pub fn config(&self, min_area: Option<u64>) -> PipelineConfig {
        let mut search = SearchConfig {
            workers: self.workers,
            batches: self.batches,
            max_area: self.max_area,
            rect_time_budget: self
                .rect_budget_secs
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64),
            best_log: self.log.clone(),
            ..SearchConfig::default()
        }
        .with_min_area(min_area.unwrap_or(0))
        .with_progress(!self.quiet);
        if self.exhaustive {
            search = search.with_validation(Validation::Exhaustive);
        }
        if let Some(capacity) = self.lru {
            search.cache = CachePolicy::Lru { capacity };
        }
        PipelineConfig {
            search,
            memory: match self.memory_floor_mib {
                0 => MemoryGuard::disabled(),
                floor => MemoryGuard::with_floor_mib(floor),
            },
            ..PipelineConfig::default()
        }
    }

    /// Raises the threshold to the last area in the log when resuming.
    pub fn resumed(&self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        let Some(log) = self.log.as_deref().filter(|_| self.resume) else {
            return Ok(config);
        };
        if let Some(last) = BestLog::last(log)? {
            tracing::info!(area = last.area, rect = %last.rect, "resuming from the logged best");
            config.search.min_area = config.search.min_area.max(last.area);
        }
        Ok(config)
    }
}

/// The explicit path, or the first default input present in `dir`.
pub fn resolve_input_in(dir: &Path, explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        DEFAULT_INPUTS
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

fn resolve_input(explicit: Option<PathBuf>) -> PathBuf {
    resolve_input_in(Path::new("."), explicit).unwrap_or_else(|| {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                format!("no input given and none of {} exists", DEFAULT_INPUTS.join(", ")),
            )
            .exit()
    })
}

fn resolve_rows(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| ArtifactPaths::for_input(&resolve_input(None)).rows)
}

/// Stops `stop` when `q` is typed on an interactive stdin.
pub fn spawn_stop_listener(stop: StopToken) {
    if !io::stdin().is_terminal() {
        return;
    }
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    tracing::warn!("stop requested, finishing current rectangles");
                    stop.stop();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let Self { command, tuning } = self;
        match command {
            Command::Fill(args) => {
                let input = resolve_input(args.input);
                let paths = ArtifactPaths::for_input(&input);
                let store = pipeline::fill_tiles(&input, &paths, &tuning.config(None))?;
                println!(
                    "{} rows written to {}",
                    store.index().len(),
                    store.path().display()
                );
            }
            Command::BuildIndex(args) => {
                let paths = ArtifactPaths::for_rows(&resolve_rows(args.rows));
                let index = pipeline::build_index(&paths, !tuning.quiet)?;
                println!("{} rows indexed in {}", index.len(), paths.index.display());
            }
            Command::ExtractCorners(args) => {
                let paths = ArtifactPaths::for_rows(&resolve_rows(args.rows));
                let summary = pipeline::extract_corners(&paths, &tuning.config(None))?;
                println!(
                    "{} corners within {} written to {}",
                    summary.corners,
                    summary.bbox,
                    paths.corners.display()
                );
            }
            Command::Search(args) => {
                let paths = ArtifactPaths::for_rows(&resolve_rows(args.rows));
                let config = tuning.resumed(tuning.config(args.min_area))?;
                let stop = StopToken::new();
                spawn_stop_listener(stop.clone());
                let outcome = pipeline::find_rectangle(&paths, &config, &stop, &ProgressBoard::new())?;
                println!("{outcome}");
            }
            Command::Solve(args) => {
                let input = resolve_input(args.input);
                let config = tuning.resumed(PipelineConfig {
                    strategy: args.strategy.into(),
                    scope: args.scope.into(),
                    ..tuning.config(args.min_area)
                })?;
                let stop = StopToken::new();
                spawn_stop_listener(stop.clone());
                let outcome = pipeline::solve_file(&input, &config, &stop)?;
                println!("{outcome}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_positionals_and_flags() {
        let cli = Cli::parse_from([
            "tiles",
            "solve",
            "poly.txt",
            "1000",
            "--scope",
            "tiles",
            "--strategy",
            "streaming",
            "--workers",
            "3",
            "--exhaustive",
        ]);
        let Command::Solve(args) = &cli.command else {
            panic!("expected solve: {cli:?}");
        };
        assert_eq!(Some(PathBuf::from("poly.txt")), args.input);
        assert_eq!(Some(1000), args.min_area);
        assert_eq!(ScopeArg::Tiles, args.scope);
        assert_eq!(StrategyArg::Streaming, args.strategy);

        let config = cli.tuning.config(args.min_area);
        assert_eq!(1000, config.search.min_area);
        assert_eq!(Some(3), config.search.workers);
        assert_eq!(Validation::Exhaustive, config.search.validation);
        assert!(config.search.show_progress);
    }

    #[test]
    fn zero_floor_disables_the_guard() {
        let cli = Cli::parse_from(["tiles", "fill", "--memory-floor-mib", "0", "--quiet"]);
        let config = cli.tuning.config(None);
        assert_eq!(MemoryGuard::disabled(), config.memory);
        assert!(!config.show_progress());
    }

    #[test]
    fn resume_starts_from_the_logged_best() -> miette::Result<()> {
        let dir = TempDir::new().map_err(crate::TheaterError::from)?;
        let log = dir.path().join("best.log");
        let log_arg = log.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["tiles", "search", "grid.rows", "10", "--log", &log_arg, "--resume"]);
        let Command::Search(args) = &cli.command else {
            panic!("expected search: {cli:?}");
        };
        assert_eq!(Some(log.clone()), cli.tuning.config(None).search.best_log);
        // Nothing logged yet.
        assert_eq!(10, cli.tuning.resumed(cli.tuning.config(args.min_area))?.search.min_area);

        fs::write(&log, "# area,min_x,min_y,max_x,max_y\n18,2,3,7,5\n24,2,3,9,5\n")
            .map_err(crate::TheaterError::from)?;
        assert_eq!(24, cli.tuning.resumed(cli.tuning.config(args.min_area))?.search.min_area);
        assert_eq!(100, cli.tuning.resumed(cli.tuning.config(Some(100)))?.search.min_area);

        let plain = Cli::parse_from(["tiles", "search", "grid.rows", "10", "--log", &log_arg]);
        assert_eq!(10, plain.tuning.resumed(plain.tuning.config(Some(10)))?.search.min_area);
        Ok(())
    }

    #[test]
    fn resume_needs_a_log() {
        let err = Cli::try_parse_from(["tiles", "search", "--resume"]).unwrap_err();
        assert_eq!(ErrorKind::MissingRequiredArgument, err.kind());
    }

    #[test]
    fn rejects_non_numeric_threshold() {
        let err = Cli::try_parse_from(["tiles", "search", "grid.rows", "big"]).unwrap_err();
        assert_eq!(ErrorKind::ValueValidation, err.kind());
    }

    #[test]
    fn default_inputs_in_order() -> miette::Result<()> {
        let dir = TempDir::new().map_err(crate::TheaterError::from)?;
        assert_eq!(None, resolve_input_in(dir.path(), None));

        fs::write(dir.path().join("input1.txt"), "").map_err(crate::TheaterError::from)?;
        assert_eq!(
            Some(dir.path().join("input1.txt")),
            resolve_input_in(dir.path(), None)
        );
        fs::write(dir.path().join("input.txt"), "").map_err(crate::TheaterError::from)?;
        assert_eq!(
            Some(dir.path().join("input.txt")),
            resolve_input_in(dir.path(), None)
        );
        assert_eq!(
            Some(PathBuf::from("mine.txt")),
            resolve_input_in(dir.path(), Some(PathBuf::from("mine.txt")))
        );
        Ok(())
    }
}
