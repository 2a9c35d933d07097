use miette::*;

use crate::polygon::parse_vertices;
use crate::search::largest_unconstrained;

/// Largest rectangle with two red tiles as opposite corners, whatever lies between them.
#[tracing::instrument]
pub fn process(input: &str) -> Result<String> {
    let vertices = parse_vertices(input)?;
    let area = largest_unconstrained(&vertices).map_or(0, |best| best.area);
    Ok(area.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() -> Result<()> {
        let input = "7,1
11,1
11,7
9,7
9,5
2,5
2,3
7,3";
        assert_eq!("50", process(input)?);
        Ok(())
    }

    #[test]
    fn corners_in_line_are_not_rectangles() -> Result<()> {
        assert_eq!("0", process("1,1\n5,1\n9,1")?);
        assert_eq!("0", process("")?);
        Ok(())
    }
}
