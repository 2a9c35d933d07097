use std::path::{Path, PathBuf};

use clap::{error::ErrorKind, CommandFactory, Parser};
use miette::*;

use theater::cli::resolve_input_in;
use theater::part2;

/// Solves part 2 of the puzzle for a vertex list.
#[derive(Debug, Parser)]
struct Args {
    /// Vertex list [default: input.txt, input2.txt or input1.txt]
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let path = resolve_input_in(Path::new("."), args.input).unwrap_or_else(|| {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "no input given and no default input file found")
            .exit()
    });
    let input = std::fs::read_to_string(&path).into_diagnostic()?;
    let result = part2::process(&input)?;
    println!("Result: {}", result);
    Ok(())
}
