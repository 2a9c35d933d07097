use clap::Parser;
use miette::*;

use theater::cli::Cli;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    Cli::parse().run()?;
    Ok(())
}
