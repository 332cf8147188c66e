//! Pixel-space geometry: points, quadrilaterals and polygon measures.

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[inline]
    pub fn distance(self, other: Point) -> f64 {
        let dx = f64::from(other.x - self.x);
        let dy = f64::from(other.y - self.y);
        dx.hypot(dy)
    }

    /// Move towards `target` by `alpha` of the way, rounded to the nearest pixel.
    pub fn lerp(self, target: Point, alpha: f64) -> Point {
        let step = |from: i32, to: i32| {
            (f64::from(from) + f64::from(to - from) * alpha).round() as i32
        };
        Point::new(step(self.x, target.x), step(self.y, target.y))
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

/// Four board corners in canonical order: top-left, top-right, bottom-right, bottom-left.
///
/// Construct with [`Quad::from_corners`] to get the canonical order regardless
/// of how the points were detected or clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad([Point; 4]);

impl Quad {
    /// Reorder four arbitrary points into TL, TR, BR, BL.
    pub fn from_corners(points: [Point; 4]) -> Self {
        Self(reorder(points))
    }

    #[inline]
    pub fn corners(&self) -> [Point; 4] {
        self.0
    }

    #[inline]
    pub fn top_left(&self) -> Point {
        self.0[0]
    }

    #[inline]
    pub fn top_right(&self) -> Point {
        self.0[1]
    }

    #[inline]
    pub fn bottom_right(&self) -> Point {
        self.0[2]
    }

    #[inline]
    pub fn bottom_left(&self) -> Point {
        self.0[3]
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.0)
    }

    /// Largest per-corner displacement between two quads.
    pub fn max_displacement(&self, other: &Quad) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.distance(*b))
            .fold(0.0, f64::max)
    }
}

/// Reorder points to TL, TR, BR, BL using sum/difference extrema.
///
/// TL has the smallest `x + y`, BR the largest; TR has the smallest `y - x`,
/// BL the largest. Ties keep the earliest point, so the result is
/// deterministic and `reorder(reorder(p)) == reorder(p)`.
pub fn reorder(points: [Point; 4]) -> [Point; 4] {
    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.y - p.x;

    let mut tl = points[0];
    let mut tr = points[0];
    let mut br = points[0];
    let mut bl = points[0];
    for p in points {
        if sum(&p) < sum(&tl) {
            tl = p;
        }
        if sum(&p) > sum(&br) {
            br = p;
        }
        if diff(&p) < diff(&tr) {
            tr = p;
        }
        if diff(&p) > diff(&bl) {
            bl = p;
        }
    }
    [tl, tr, br, bl]
}

/// Absolute area of a closed polygon (shoelace formula).
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    twice.unsigned_abs() as f64 / 2.0
}

/// Perimeter of a closed polygon.
pub fn perimeter(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.distance(*b))
        .sum()
}
