use std::collections::HashSet;
use std::fmt;

use chumsky::prelude::*;
use glam::I64Vec2;
use itertools::Itertools;
use miette::NamedSource;

use crate::error::{Result, TheaterError};

pub type Vertex = I64Vec2;

/// Inclusive extent of a set of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl BoundingBox {
    pub fn around(points: impl IntoIterator<Item = Vertex>) -> Option<Self> {
        points.into_iter().fold(None, |bbox, p| {
            Some(match bbox {
                None => Self {
                    min_x: p.x,
                    max_x: p.x,
                    min_y: p.y,
                    max_y: p.y,
                },
                Some(b) => b.including(p),
            })
        })
    }

    pub fn including(self, p: Vertex) -> Self {
        Self {
            min_x: self.min_x.min(p.x),
            max_x: self.max_x.max(p.x),
            min_y: self.min_y.min(p.y),
            max_y: self.max_y.max(p.y),
        }
    }

    pub fn width(&self) -> u64 {
        (self.max_x - self.min_x).unsigned_abs() + 1
    }

    pub fn height(&self) -> u64 {
        (self.max_y - self.min_y).unsigned_abs() + 1
    }

    pub fn tiles(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    pub fn contains(&self, p: Vertex) -> bool {
        (self.min_x..=self.max_x).contains(&p.x) && (self.min_y..=self.max_y).contains(&p.y)
    }
}

/// Serialized as `min_x,max_x,min_y,max_y`, the corners file header layout.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.min_x, self.max_x, self.min_y, self.max_y)
    }
}

fn parser<'a>() -> impl Parser<'a, &'a str, Vec<(Vertex, SimpleSpan)>, extra::Err<Rich<'a, char>>> {
    let coord = just('-')
        .or_not()
        .then(text::int(10))
        .to_slice()
        .from_str::<i64>()
        .unwrapped();

    coord
        .then_ignore(just(','))
        .then(coord)
        .map_with(|(x, y), e| (Vertex::new(x, y), e.span()))
        .separated_by(text::newline())
        .allow_trailing()
        .collect::<Vec<_>>()
        .padded()
}

/// Parses `x,y` lines without checking that they form a polygon.
pub fn parse_vertices(input: &str) -> Result<Vec<Vertex>> {
    Ok(parse_spanned("input", input)?
        .into_iter()
        .map(|(v, _)| v)
        .collect())
}

fn parse_spanned(name: &str, input: &str) -> Result<Vec<(Vertex, SimpleSpan)>> {
    parser().parse(input).into_result().map_err(|errors| {
        let (span, reason) = errors
            .first()
            .map(|e| (e.span().into_range(), e.to_string()))
            .unwrap_or((0..0, "unexpected input".to_string()));
        TheaterError::Parse {
            src: NamedSource::new(name, input.to_string()),
            span: span.into(),
            reason,
        }
    })
}

/// A closed rectilinear polygon: the last vertex connects back to the first and every
/// edge is horizontal or vertical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    vertices: Vec<Vertex>,
    bbox: BoundingBox,
}

impl Polygon {
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_named("input", input)
    }

    #[tracing::instrument(skip(input), fields(bytes = input.len()))]
    pub fn parse_named(name: &str, input: &str) -> Result<Self> {
        let spanned = parse_spanned(name, input)?;
        let spans = spanned.iter().map(|(_, s)| s.into_range()).collect::<Vec<_>>();
        let vertices = spanned.into_iter().map(|(v, _)| v).collect::<Vec<_>>();
        Self::build(vertices, |vertex| {
            (
                NamedSource::new(name, input.to_string()),
                spans[vertex].clone(),
            )
        })
    }

    pub fn from_vertices(vertices: Vec<Vertex>) -> Result<Self> {
        // Render the vertices back to text so axis errors still point at a line.
        let mut text = String::new();
        let mut spans = Vec::with_capacity(vertices.len());
        for v in &vertices {
            let line = format!("{},{}", v.x, v.y);
            spans.push(text.len()..text.len() + line.len());
            text.push_str(&line);
            text.push('\n');
        }
        Self::build(vertices, |vertex| {
            (NamedSource::new("vertices", text.clone()), spans[vertex].clone())
        })
    }

    fn build(
        vertices: Vec<Vertex>,
        locate: impl Fn(usize) -> (NamedSource<String>, std::ops::Range<usize>),
    ) -> Result<Self> {
        let bbox = BoundingBox::around(vertices.iter().copied()).ok_or(TheaterError::EmptyPolygon)?;

        for (index, (a, b)) in vertices.iter().circular_tuple_windows().enumerate() {
            if a.x != b.x && a.y != b.y {
                let (src, span) = locate((index + 1) % vertices.len());
                return Err(TheaterError::NotAxisAligned {
                    src,
                    span: span.into(),
                    index,
                    from: (a.x, a.y),
                    to: (b.x, b.y),
                });
            }
        }

        tracing::debug!(vertices = vertices.len(), %bbox, "polygon accepted");
        Ok(Self { vertices, bbox })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    /// Consecutive vertex pairs, including the closing edge back to the first vertex.
    pub fn edges(&self) -> impl Iterator<Item = (Vertex, Vertex)> + '_ {
        self.vertices.iter().copied().circular_tuple_windows()
    }

    pub fn is_on_edge(&self, x: i64, y: i64) -> bool {
        self.edges().any(|(a, b)| {
            if a.x == b.x {
                x == a.x && (a.y.min(b.y)..=a.y.max(b.y)).contains(&y)
            } else {
                y == a.y && (a.x.min(b.x)..=a.x.max(b.x)).contains(&x)
            }
        })
    }

    /// Ray casting towards +x. The strict `(a.y > y) != (b.y > y)` test counts a vertex
    /// on the ray once, never twice.
    pub fn is_inside(&self, x: i64, y: i64) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > y) != (b.y > y) {
                let cross =
                    (b.x - a.x) as f64 * (y - a.y) as f64 / (b.y - a.y) as f64 + a.x as f64;
                if (x as f64) < cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// A tile is green when it is on the boundary or inside it.
    pub fn is_green(&self, x: i64, y: i64) -> bool {
        self.is_on_edge(x, y) || self.is_inside(x, y)
    }
}

/// Vertex list of a staircase with `steps` steps of `size` tiles, going down from the
/// top-right corner to the bottom-left one.
pub fn staircase(steps: u32, size: i64) -> String {
    let steps = i64::from(steps.max(1));
    let side = steps * size;
    let mut vertices = vec![(0, 0), (side, 0)];
    for k in 1..steps {
        vertices.push((side - (k - 1) * size, k * size));
        vertices.push((side - k * size, k * size));
    }
    vertices.push((size, side));
    vertices.push((0, side));
    vertices.iter().map(|(x, y)| format!("{x},{y}")).join("\n")
}

/// Every boundary tile, computed once so membership is a hash lookup instead of a walk
/// over all edges.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    tiles: HashSet<(i64, i64)>,
}

impl EdgeSet {
    pub fn new(polygon: &Polygon) -> Self {
        let mut tiles = HashSet::new();
        for (a, b) in polygon.edges() {
            if a.x == b.x {
                tiles.extend((a.y.min(b.y)..=a.y.max(b.y)).map(|y| (a.x, y)));
            } else {
                tiles.extend((a.x.min(b.x)..=a.x.max(b.x)).map(|x| (x, a.y)));
            }
        }
        Self { tiles }
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.tiles.contains(&(x, y))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
