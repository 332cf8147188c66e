use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::geometry::{Point, Quad};

/// Projective transform between two planes, `dst ~ H * src`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Solve H from four point correspondences (h33 fixed to 1).
    ///
    /// Returns `None` for degenerate configurations, e.g. three collinear points.
    pub fn from_correspondences(src: [(f64, f64); 4], dst: [(f64, f64); 4]) -> Option<Self> {
        if has_collinear_triple(&src) || has_collinear_triple(&dst) {
            return None;
        }

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for (k, ((x, y), (u, v))) in src.into_iter().zip(dst).enumerate() {
            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = r0 + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let h = a.lu().solve(&b)?;
        let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        m.is_invertible().then_some(Self(m))
    }

    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let v = self.0 * Vector3::new(x, y, 1.0);
        (v[0] / v[2], v[1] / v[2])
    }
}

fn has_collinear_triple(points: &[(f64, f64); 4]) -> bool {
    let cross = |a: (f64, f64), b: (f64, f64), c: (f64, f64)| {
        (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
    };
    [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)]
        .into_iter()
        .any(|(i, j, k)| cross(points[i], points[j], points[k]).abs() < 1e-9)
}

/// Map the board quadrilateral in `frame` onto a `size`×`size` top-down image.
///
/// Corner order follows [`Quad`]: the top-left corner lands at (0, 0), so
/// rank 8 is the top row of the result.
pub fn warp_board(frame: &RgbImage, quad: &Quad, size: u32) -> Option<RgbImage> {
    let s = f64::from(size);
    let board = [(0.0, 0.0), (s, 0.0), (s, s), (0.0, s)];
    let image = quad.corners().map(|Point { x, y }| (f64::from(x), f64::from(y)));
    let board_to_image = Homography::from_correspondences(board, image)?;

    Some(RgbImage::from_fn(size, size, |x, y| {
        let (sx, sy) = board_to_image.apply(f64::from(x) + 0.5, f64::from(y) + 0.5);
        sample_bilinear(frame, sx - 0.5, sy - 0.5)
    }))
}

/// Bilinear sample; pixels outside the frame read as black.
fn sample_bilinear(frame: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = frame.dimensions();
    let fetch = |px: i64, py: i64| -> [f64; 3] {
        if px < 0 || py < 0 || px >= i64::from(width) || py >= i64::from(height) {
            return [0.0; 3];
        }
        frame.get_pixel(px as u32, py as u32).0.map(f64::from)
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (p00, p10) = (fetch(x0, y0), fetch(x0 + 1, y0));
    let (p01, p11) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] + fx * (p10[c] - p00[c]);
        let bottom = p01[c] + fx * (p11[c] - p01[c]);
        out[c] = (top + fy * (bottom - top)).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
