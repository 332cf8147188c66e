use image::GrayImage;

use crate::geometry::Point;

/// 8-neighbourhood offsets in clockwise order (image y axis points down),
/// starting east.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Outer boundary of every 8-connected foreground component.
///
/// Each contour runs clockwise through boundary pixel centres, starting at the
/// component's top-most, left-most pixel. Holes are not traced.
pub fn find_contours(binary: &GrayImage) -> Vec<Vec<Point>> {
    let (width, height) = binary.dimensions();
    let foreground = |p: Point| {
        p.x >= 0
            && p.y >= 0
            && (p.x as u32) < width
            && (p.y as u32) < height
            && binary.get_pixel(p.x as u32, p.y as u32)[0] != 0
    };

    let mut visited = vec![false; width as usize * height as usize];
    let index = |p: Point| p.y as usize * width as usize + p.x as usize;
    let mut contours = Vec::new();
    let mut stack = Vec::new();

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let start = Point::new(x, y);
            if visited[index(start)] || !foreground(start) {
                continue;
            }

            visited[index(start)] = true;
            stack.push(start);
            while let Some(p) = stack.pop() {
                for (dx, dy) in DIRECTIONS {
                    let q = Point::new(p.x + dx, p.y + dy);
                    if foreground(q) && !visited[index(q)] {
                        visited[index(q)] = true;
                        stack.push(q);
                    }
                }
            }

            contours.push(trace_boundary(&foreground, start, width as usize * height as usize));
        }
    }
    contours
}

/// Radial-sweep boundary tracing from a top-left-most component pixel.
fn trace_boundary(foreground: &impl Fn(Point) -> bool, start: Point, max_steps: usize) -> Vec<Point> {
    let next = |p: Point, from_dir: usize| {
        (0..8).map(|k| (from_dir + k) % 8).find_map(|d| {
            let (dx, dy) = DIRECTIONS[d];
            let q = Point::new(p.x + dx, p.y + dy);
            foreground(q).then_some((d, q))
        })
    };

    let mut contour = vec![start];
    // Everything north and west of the start pixel is background.
    let Some((mut dir, first)) = next(start, 5) else {
        return contour;
    };

    let mut current = first;
    for _ in 0..4 * max_steps + 8 {
        // Resume the sweep just clockwise of the pixel we came from.
        let Some((next_dir, next_point)) = next(current, (dir + 5) % 8) else {
            break;
        };
        if current == start && next_point == first {
            break;
        }
        contour.push(current);
        current = next_point;
        dir = next_dir;
    }
    contour
}

/// Douglas–Peucker simplification of a closed contour.
///
/// `epsilon` is the maximum distance, in pixels, between the contour and the
/// returned polygon.
pub fn approx_polygon(contour: &[Point], epsilon: f64) -> Vec<Point> {
    if contour.len() < 3 {
        return contour.to_vec();
    }

    let origin = contour[0];
    let far = contour
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| origin.distance(**a).total_cmp(&origin.distance(**b)))
        .map_or(0, |(i, _)| i);
    if far == 0 {
        return vec![origin];
    }

    let mut polygon = Vec::new();
    simplify(&contour[..=far], epsilon, &mut polygon);
    let closing: Vec<Point> = contour[far..].iter().chain(std::iter::once(&origin)).copied().collect();
    simplify(&closing, epsilon, &mut polygon);

    // The start pixel is kept unconditionally above; drop it if it lies on an edge.
    if polygon.len() > 3 {
        let prev = polygon[polygon.len() - 1];
        if segment_distance(polygon[0], prev, polygon[1]) <= epsilon {
            polygon.remove(0);
        }
    }
    polygon
}

/// Emits `points[0]` and every retained interior point, never the last point.
fn simplify(points: &[Point], epsilon: f64, out: &mut Vec<Point>) {
    let (first, last) = (points[0], points[points.len() - 1]);
    let mut split = None;
    let mut max_distance = epsilon;
    for (i, p) in points.iter().enumerate().take(points.len().saturating_sub(1)).skip(1) {
        let d = segment_distance(*p, first, last);
        if d > max_distance {
            max_distance = d;
            split = Some(i);
        }
    }

    match split {
        Some(i) => {
            simplify(&points[..=i], epsilon, out);
            simplify(&points[i..], epsilon, out);
        }
        None => out.push(first),
    }
}

/// Distance from `p` to the line through `a` and `b`.
fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let length = a.distance(b);
    if length == 0.0 {
        return p.distance(a);
    }
    let cross = f64::from(b.x - a.x) * f64::from(a.y - p.y) - f64::from(a.x - p.x) * f64::from(b.y - a.y);
    cross.abs() / length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{perimeter, polygon_area};
    use image::Luma;

    fn filled_rect(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) { 255 } else { 0 }])
        })
    }

    #[test]
    fn traces_filled_square_clockwise() {
        let image = filled_rect(5, 5, 1, 1, 3, 3);
        let contours = find_contours(&image);

        assert_eq!(contours.len(), 1);
        assert_eq!(
            contours[0],
            vec![
                Point::new(1, 1),
                Point::new(2, 1),
                Point::new(3, 1),
                Point::new(3, 2),
                Point::new(3, 3),
                Point::new(2, 3),
                Point::new(1, 3),
                Point::new(1, 2),
            ]
        );
    }

    #[test]
    fn separate_components_get_separate_contours() {
        let mut image = filled_rect(20, 10, 1, 1, 4, 4);
        for (x, y) in [(10, 5), (11, 5), (12, 5)] {
            image.put_pixel(x, y, Luma([255]));
        }
        assert_eq!(find_contours(&image).len(), 2);
    }

    #[test]
    fn isolated_pixel_is_single_point_contour() {
        let image = filled_rect(5, 5, 2, 2, 2, 2);
        assert_eq!(find_contours(&image), vec![vec![Point::new(2, 2)]]);
    }

    #[test]
    fn ring_outer_boundary_encloses_hole() {
        let mut image = filled_rect(60, 60, 10, 10, 49, 49);
        for y in 14..=45 {
            for x in 14..=45 {
                image.put_pixel(x, y, Luma([0]));
            }
        }
        let contours = find_contours(&image);

        assert_eq!(contours.len(), 1);
        assert_eq!(polygon_area(&contours[0]), 39.0 * 39.0);
    }

    #[test]
    fn rectangle_contour_simplifies_to_four_corners() {
        let image = filled_rect(100, 80, 10, 10, 89, 69);
        let contour = &find_contours(&image)[0];
        let polygon = approx_polygon(contour, 0.02 * perimeter(contour));

        assert_eq!(
            polygon,
            vec![
                Point::new(10, 10),
                Point::new(89, 10),
                Point::new(89, 69),
                Point::new(10, 69),
            ]
        );
    }

    #[test]
    fn triangle_keeps_three_vertices() {
        let triangle = vec![
            Point::new(0, 0),
            Point::new(5, 5),
            Point::new(10, 10),
            Point::new(5, 10),
            Point::new(0, 10),
            Point::new(0, 5),
        ];
        let polygon = approx_polygon(&triangle, 1.0);
        assert_eq!(polygon, vec![Point::new(0, 0), Point::new(10, 10), Point::new(0, 10)]);
    }
}
