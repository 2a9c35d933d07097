pub mod cli;
pub mod config;
pub mod corners;
pub mod error;
pub mod guard;
pub mod parallel;
pub mod part1;
pub mod part2;
pub mod pipeline;
pub mod polygon;
pub mod progress;
pub mod raster;
pub mod search;
pub mod store;

pub use error::{Result, TheaterError};
