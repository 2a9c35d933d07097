use miette::*;

use crate::config::PipelineConfig;
use crate::parallel::StopToken;
use crate::pipeline::solve_in_memory;
use crate::polygon::Polygon;

/// Largest rectangle with two red tiles as opposite corners and only red or green
/// tiles inside.
///
/// The whole grid is rasterized in memory, so polygons whose bounding box holds more
/// than [`MAX_IN_MEMORY_TILES`](crate::config::MAX_IN_MEMORY_TILES) tiles fail with
/// [`TheaterError::GridTooLarge`](crate::TheaterError::GridTooLarge). Those go through
/// the streaming strategy of the `tiles` binary instead.
#[tracing::instrument]
pub fn process(input: &str) -> Result<String> {
    process_with(input, &PipelineConfig::default())
}

pub fn process_with(input: &str, config: &PipelineConfig) -> Result<String> {
    let polygon = Polygon::parse(input)?;
    let outcome = solve_in_memory(&polygon, config, &StopToken::new())?;
    Ok(outcome.area().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::config::SearchConfig;
    use crate::corners::CornerScope;
    use crate::guard::MemoryGuard;

    const INPUT: &str = "7,1
11,1
11,7
9,7
9,5
2,5
2,3
7,3";

    #[test]
    fn it_works() -> Result<()> {
        assert_eq!("24", process(INPUT)?);
        Ok(())
    }

    #[rstest]
    #[case(CornerScope::Vertices, 0, "24")]
    #[case(CornerScope::Vertices, 24, "24")]
    #[case(CornerScope::Vertices, 25, "0")]
    #[case(CornerScope::Tiles, 0, "30")]
    #[case(CornerScope::Tiles, 30, "30")]
    #[case(CornerScope::Tiles, 31, "0")]
    fn scopes_and_thresholds(
        #[case] scope: CornerScope,
        #[case] min_area: u64,
        #[case] expected: &str,
    ) -> Result<()> {
        let config = PipelineConfig {
            scope,
            search: SearchConfig::default().with_min_area(min_area),
            memory: MemoryGuard::disabled(),
            ..Default::default()
        };
        assert_eq!(expected, process_with(INPUT, &config)?);
        Ok(())
    }

    #[test]
    fn oversized_grid_points_at_streaming() {
        let err = process("0,0\n20000,0\n20000,20000\n0,20000").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::TheaterError>(),
            Some(crate::TheaterError::GridTooLarge {
                tiles: 400_040_001,
                budget
            }) if *budget == crate::config::MAX_IN_MEMORY_TILES
        ));
        let help = err.help().map(|help| help.to_string()).unwrap_or_default();
        assert!(help.contains("tiles solve --strategy streaming"), "{help}");
    }

    #[test]
    fn diagonal_edges_are_rejected() {
        assert!(process("0,0\n4,0\n5,3\n0,3").is_err());
    }
}
