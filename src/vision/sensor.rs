use std::fmt;
use std::ops::Range;

use image::{GrayImage, Luma, RgbImage, imageops};
use log::{trace, warn};

use super::edges::Gradient;
use crate::config::SensorConfig;
use crate::occupancy::{OccupancyGrid, SquareBrightness, square_at};

/// Per-square texture statistics behind a reference-free scan.
///
/// Indexed `[row][col]` in vision grid coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMetrics {
    pub variance: [[f64; 8]; 8],
    pub edge_density: [[f64; 8]; 8],
}

impl fmt::Display for SquareMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..8 {
            write!(f, "{} ", 8 - row)?;
            for col in 0..8 {
                write!(
                    f,
                    "{:>6.0}/{:<4.2} ",
                    self.variance[row][col], self.edge_density[row][col]
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Classifies each square of a top-down board image as occupied or empty.
///
/// The image is expected to show rank 8 along its top edge and file a along
/// its left edge, as produced by [`super::warp_board`].
#[derive(Debug, Clone)]
pub struct OccupancySensor {
    config: SensorConfig,
}

impl Default for OccupancySensor {
    fn default() -> Self {
        Self::new(&SensorConfig::default())
    }
}

impl OccupancySensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Reference-free occupancy from local texture.
    pub fn scan(&self, board: &RgbImage) -> OccupancyGrid {
        self.scan_with_metrics(board).0
    }

    /// Like [`scan`](Self::scan), also returning the statistics each square
    /// was judged on.
    pub fn scan_with_metrics(&self, board: &RgbImage) -> (OccupancyGrid, SquareMetrics) {
        let c = &self.config;
        let equalized = clahe(&imageops::grayscale(board), c.clahe_clip_limit, c.clahe_tiles);
        let gradient = Gradient::sobel(&equalized);

        let mut rows = [[false; 8]; 8];
        let mut metrics = SquareMetrics {
            variance: [[0.0; 8]; 8],
            edge_density: [[0.0; 8]; 8],
        };
        for row in 0..8 {
            for col in 0..8 {
                let (xs, ys) = self.crop(board.dimensions(), row, col);
                let variance = variance(&equalized, xs.clone(), ys.clone());
                let density = edge_density(&gradient, xs, ys, c.edge_magnitude);

                rows[row][col] = variance > c.variance_high
                    || density > c.edge_high
                    || (variance > c.variance_joint && density > c.edge_joint);
                metrics.variance[row][col] = variance;
                metrics.edge_density[row][col] = density;
            }
        }
        trace!("square metrics (variance/edge density):\n{metrics}");
        (OccupancyGrid::from_rows(rows), metrics)
    }

    /// Occupancy from the difference against an empty-board reference image.
    ///
    /// A square is occupied when more than `diff_occupied_percent` of its
    /// centre crop changed by more than `diff_threshold` grey levels. A
    /// reference of different size than `board` yields an empty grid.
    pub fn scan_diff(&self, board: &RgbImage, reference: &RgbImage) -> OccupancyGrid {
        if board.dimensions() != reference.dimensions() {
            warn!(
                "reference is {:?} but board image is {:?}, ignoring",
                reference.dimensions(),
                board.dimensions()
            );
            return OccupancyGrid::EMPTY;
        }

        let threshold = f32::from(self.config.diff_threshold);
        let mut rows = [[false; 8]; 8];
        for (row, cells) in rows.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                let (xs, ys) = self.crop(board.dimensions(), row, col);
                let total = xs.len() * ys.len();
                if total == 0 {
                    continue;
                }
                let mut changed = 0usize;
                for y in ys {
                    for x in xs.clone() {
                        let a = board.get_pixel(x, y).0;
                        let b = reference.get_pixel(x, y).0;
                        if luma(absdiff(a, b)) > threshold {
                            changed += 1;
                        }
                    }
                }
                let percent = changed as f64 * 100.0 / total as f64;
                *cell = percent > self.config.diff_occupied_percent;
            }
        }
        OccupancyGrid::from_rows(rows)
    }

    /// Mean grey level of each square's centre crop.
    pub fn brightness(&self, board: &RgbImage) -> SquareBrightness {
        let mut brightness = SquareBrightness::uniform(0.0);
        for row in 0..8 {
            for col in 0..8 {
                let (xs, ys) = self.crop(board.dimensions(), row, col);
                let total = xs.len() * ys.len();
                if total == 0 {
                    continue;
                }
                let sum: f32 = ys
                    .flat_map(|y| xs.clone().map(move |x| (x, y)))
                    .map(|(x, y)| luma(board.get_pixel(x, y).0))
                    .sum();
                brightness.set(square_at(row, col), sum / total as f32);
            }
        }
        brightness
    }

    /// Pixel ranges of a square with `square_inset` removed on every side.
    fn crop(&self, (width, height): (u32, u32), row: usize, col: usize) -> (Range<u32>, Range<u32>) {
        let inset = self.config.square_inset;
        let span = |index: usize, extent: u32| {
            let cell = f64::from(extent) / 8.0;
            let start = ((index as f64 + inset) * cell).round() as u32;
            let end = ((index as f64 + 1.0 - inset) * cell).round() as u32;
            start.min(extent)..end.min(extent)
        };
        (span(col, width), span(row, height))
    }
}

fn absdiff(a: [u8; 3], b: [u8; 3]) -> [u8; 3] {
    [a[0].abs_diff(b[0]), a[1].abs_diff(b[1]), a[2].abs_diff(b[2])]
}

/// Rec. 601 luma.
#[inline]
fn luma([r, g, b]: [u8; 3]) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

fn variance(image: &GrayImage, xs: Range<u32>, ys: Range<u32>) -> f64 {
    let n = (xs.len() * ys.len()) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let (mut sum, mut sum_sq) = (0.0, 0.0);
    for y in ys {
        for x in xs.clone() {
            let v = f64::from(image.get_pixel(x, y)[0]);
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn edge_density(gradient: &Gradient, xs: Range<u32>, ys: Range<u32>, magnitude: f32) -> f64 {
    let n = xs.len() * ys.len();
    if n == 0 {
        return 0.0;
    }
    let edges = ys
        .flat_map(|y| xs.clone().map(move |x| (x, y)))
        .filter(|&(x, y)| gradient.magnitude(x, y) > magnitude)
        .count();
    edges as f64 / n as f64
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tiles`×`tiles` regions, each equalized with its
/// histogram clipped at `clip_limit` times the mean bin height; pixels are
/// mapped by bilinear interpolation between the four nearest tile mappings.
pub fn clahe(image: &GrayImage, clip_limit: f64, tiles: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles = tiles.clamp(1, width.min(height));
    let bound = |i: u32, extent: u32| (u64::from(i) * u64::from(extent) / u64::from(tiles)) as u32;

    let mut luts = Vec::with_capacity((tiles * tiles) as usize);
    for ty in 0..tiles {
        for tx in 0..tiles {
            let xs = bound(tx, width)..bound(tx + 1, width);
            let ys = bound(ty, height)..bound(ty + 1, height);
            luts.push(tile_lut(image, xs, ys, clip_limit));
        }
    }

    let tile_w = f64::from(width) / f64::from(tiles);
    let tile_h = f64::from(height) / f64::from(tiles);
    GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, wx) = neighbour_tiles((f64::from(x) + 0.5) / tile_w - 0.5, tiles);
        let (ty0, ty1, wy) = neighbour_tiles((f64::from(y) + 0.5) / tile_h - 0.5, tiles);
        let v = usize::from(image.get_pixel(x, y)[0]);
        let map = |tx: u32, ty: u32| f64::from(luts[(ty * tiles + tx) as usize][v]);

        let top = map(tx0, ty0) * (1.0 - wx) + map(tx1, ty0) * wx;
        let bottom = map(tx0, ty1) * (1.0 - wx) + map(tx1, ty1) * wx;
        Luma([(top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8])
    })
}

/// Tiles either side of a fractional tile coordinate and the weight of the second.
fn neighbour_tiles(position: f64, tiles: u32) -> (u32, u32, f64) {
    let last = f64::from(tiles - 1);
    let position = position.clamp(0.0, last);
    let first = position.floor();
    let second = (first + 1.0).min(last);
    (first as u32, second as u32, position - first)
}

fn tile_lut(image: &GrayImage, xs: Range<u32>, ys: Range<u32>, clip_limit: f64) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in ys {
        for x in xs.clone() {
            histogram[usize::from(image.get_pixel(x, y)[0])] += 1;
        }
    }
    let pixels: u32 = histogram.iter().sum();
    if pixels == 0 {
        return std::array::from_fn(|i| i as u8);
    }

    let limit = ((clip_limit * f64::from(pixels) / 256.0) as u32).max(1);
    let mut excess = 0;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let (share, residual) = (excess / 256, excess % 256);
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += share + u32::from((i as u32) < residual);
    }

    let scale = 255.0 / f64::from(pixels);
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (entry, bin) in lut.iter_mut().zip(histogram) {
        cdf += bin;
        *entry = (f64::from(cdf) * scale).round().min(255.0) as u8;
    }
    lut
}
