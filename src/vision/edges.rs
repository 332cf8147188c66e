use std::collections::VecDeque;

use image::{GrayImage, Luma, RgbImage, imageops};

/// Pixel value marking an edge in binary edge maps.
pub const EDGE: u8 = 255;

/// Sigma matching a 5×5 Gaussian kernel with automatic sigma.
const BLUR_SIGMA: f32 = 1.1;

// tan(22.5°) and tan(67.5°) scaled by 1000 for integer direction binning.
const TAN_22_5: i64 = 414;
const TAN_67_5: i64 = 2414;

/// Turn a camera frame into a dilated binary edge map suitable for contour search.
///
/// Greyscale, 5×5 Gaussian blur, Canny with the given hysteresis thresholds,
/// then a 3×3 dilation to close small gaps in the board outline.
pub fn preprocess(frame: &RgbImage, low: f32, high: f32) -> GrayImage {
    let grey = imageops::grayscale(frame);
    let blurred = imageops::blur(&grey, BLUR_SIGMA);
    dilate(&canny(&blurred, low, high))
}

/// Sobel derivatives of a greyscale image, replicating border pixels.
#[derive(Debug, Clone)]
pub struct Gradient {
    width: u32,
    height: u32,
    gx: Vec<i32>,
    gy: Vec<i32>,
}

impl Gradient {
    pub fn sobel(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let at = |x: i64, y: i64| -> i32 {
            let cx = x.clamp(0, i64::from(width) - 1) as u32;
            let cy = y.clamp(0, i64::from(height) - 1) as u32;
            i32::from(image.get_pixel(cx, cy)[0])
        };

        let len = width as usize * height as usize;
        let mut gx = Vec::with_capacity(len);
        let mut gy = Vec::with_capacity(len);
        for y in 0..i64::from(height) {
            for x in 0..i64::from(width) {
                let (tl, t, tr) = (at(x - 1, y - 1), at(x, y - 1), at(x + 1, y - 1));
                let (l, r) = (at(x - 1, y), at(x + 1, y));
                let (bl, b, br) = (at(x - 1, y + 1), at(x, y + 1), at(x + 1, y + 1));
                gx.push((tr + 2 * r + br) - (tl + 2 * l + bl));
                gy.push((bl + 2 * b + br) - (tl + 2 * t + tr));
            }
        }
        Self {
            width,
            height,
            gx,
            gy,
        }
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// L1 gradient magnitude `|gx| + |gy|` at a pixel.
    #[inline]
    pub fn magnitude(&self, x: u32, y: u32) -> f32 {
        let i = self.index(x, y);
        (self.gx[i].abs() + self.gy[i].abs()) as f32
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// Canny edge detector: Sobel gradient, non-maximum suppression, hysteresis.
pub fn canny(image: &GrayImage, low: f32, high: f32) -> GrayImage {
    let gradient = Gradient::sobel(image);
    let (width, height) = gradient.dimensions();
    let mut out = GrayImage::new(width, height);
    if width < 3 || height < 3 {
        return out;
    }

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; width as usize * height as usize];
    let mut seeds = VecDeque::new();

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mag = gradient.magnitude(x, y);
            if mag <= low {
                continue;
            }
            let i = gradient.index(x, y);
            let (ax, ay) = (i64::from(gradient.gx[i].abs()), i64::from(gradient.gy[i].abs()));
            let ((x1, y1), (x2, y2)) = if ay * 1000 <= ax * TAN_22_5 {
                ((x - 1, y), (x + 1, y))
            } else if ay * 1000 >= ax * TAN_67_5 {
                ((x, y - 1), (x, y + 1))
            } else if (gradient.gx[i] > 0) == (gradient.gy[i] > 0) {
                ((x - 1, y - 1), (x + 1, y + 1))
            } else {
                ((x + 1, y - 1), (x - 1, y + 1))
            };
            if mag > gradient.magnitude(x1, y1) && mag >= gradient.magnitude(x2, y2) {
                if mag > high {
                    class[i] = 2;
                    seeds.push_back((x, y));
                } else {
                    class[i] = 1;
                }
            }
        }
    }

    while let Some((x, y)) = seeds.pop_front() {
        out.put_pixel(x, y, Luma([EDGE]));
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let j = gradient.index(nx, ny);
                if class[j] == 1 {
                    class[j] = 2;
                    seeds.push_back((nx, ny));
                }
            }
        }
    }
    out
}

/// 3×3 morphological dilation.
pub fn dilate(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut max = 0;
        for ny in y.saturating_sub(1)..=(y + 1).min(height.saturating_sub(1)) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width.saturating_sub(1)) {
                max = max.max(image.get_pixel(nx, ny)[0]);
            }
        }
        Luma([max])
    })
}
