use image::GrayImage;
use log::{debug, trace};

use super::contours::{approx_polygon, find_contours};
use crate::config::LocalizerConfig;
use crate::geometry::{Point, Quad, perimeter, polygon_area};

/// Finds the board outline in a binary edge map.
#[derive(Debug, Clone)]
pub struct BoardLocalizer {
    min_area_fraction: f64,
    approx_epsilon: f64,
    max_diagonal_skew: f64,
}

impl Default for BoardLocalizer {
    fn default() -> Self {
        Self::new(&LocalizerConfig::default())
    }
}

impl BoardLocalizer {
    pub fn new(config: &LocalizerConfig) -> Self {
        Self {
            min_area_fraction: config.min_area_fraction,
            approx_epsilon: config.approx_epsilon,
            max_diagonal_skew: config.max_diagonal_skew,
        }
    }

    /// Largest near-square quadrilateral contour, if any.
    ///
    /// Preferring the largest candidate picks the outer board frame over an
    /// inner notation border. `None` means the board is not (yet) visible.
    pub fn locate(&self, edges: &GrayImage) -> Option<Quad> {
        let (width, height) = edges.dimensions();
        let min_area = f64::from(width) * f64::from(height) * self.min_area_fraction;

        let mut best: Option<(f64, Quad)> = None;
        for contour in find_contours(edges) {
            let area = polygon_area(&contour);
            if area < min_area {
                continue;
            }

            let polygon = approx_polygon(&contour, self.approx_epsilon * perimeter(&contour));
            let Ok(corners) = <[Point; 4]>::try_from(polygon.as_slice()) else {
                trace!("rejecting {}-vertex contour of area {area:.0}", polygon.len());
                continue;
            };

            // Polygon vertices are in traversal order, so 0-2 and 1-3 are diagonals.
            let d1 = corners[0].distance(corners[2]);
            let d2 = corners[1].distance(corners[3]);
            let skew = (d1 - d2).abs() / d1.max(d2);
            if skew >= self.max_diagonal_skew {
                trace!("rejecting quad with diagonal skew {skew:.2}");
                continue;
            }

            if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
                best = Some((area, Quad::from_corners(corners)));
            }
        }

        if let Some((area, quad)) = &best {
            debug!("board candidate {:?} (area {area:.0})", quad.corners());
        }
        best.map(|(_, quad)| quad)
    }
}

/// Temporal smoothing of detected board corners.
///
/// Each corner follows an exponential moving average. Readings that jump
/// further than `max_jump` from the last accepted corner are ignored for that
/// corner. While detection keeps failing the jump limit is relaxed, and after
/// `reset_after` missed frames the memory is dropped so the board can be
/// re-acquired anywhere.
#[derive(Debug, Clone)]
pub struct BoardSmoother {
    alpha: f64,
    max_jump: f64,
    relax_after: u32,
    relax_factor: f64,
    reset_after: u32,
    last: Option<Quad>,
    missed: u32,
}

impl Default for BoardSmoother {
    fn default() -> Self {
        Self::new(&LocalizerConfig::default())
    }
}

impl BoardSmoother {
    pub fn new(config: &LocalizerConfig) -> Self {
        Self {
            alpha: config.alpha,
            max_jump: config.max_jump,
            relax_after: config.relax_after,
            relax_factor: config.relax_factor,
            reset_after: config.reset_after,
            last: None,
            missed: 0,
        }
    }

    /// Last stable corners, if the board has been acquired.
    #[inline]
    pub fn current(&self) -> Option<Quad> {
        self.last
    }

    /// Consecutive frames without a detection.
    #[inline]
    pub fn frames_missed(&self) -> u32 {
        self.missed
    }

    /// Forget the board and wait for a fresh acquisition.
    pub fn reset(&mut self) {
        self.last = None;
        self.missed = 0;
    }

    /// Fold one frame's detection (or lack of one) into the stable corners.
    pub fn smooth(&mut self, candidate: Option<Quad>) -> Option<Quad> {
        let Some(candidate) = candidate else {
            self.missed = self.missed.saturating_add(1);
            if self.missed > self.reset_after && self.last.is_some() {
                debug!("board lost for {} frames, clearing corners", self.missed);
                self.last = None;
            }
            return self.last;
        };

        let jump_limit = if self.missed > self.relax_after {
            self.max_jump * self.relax_factor
        } else {
            self.max_jump
        };
        self.missed = 0;

        let Some(last) = self.last else {
            self.last = Some(candidate);
            return self.last;
        };

        let previous = last.corners();
        let observed = candidate.corners();
        let mut smoothed = previous;
        for (i, corner) in smoothed.iter_mut().enumerate() {
            let movement = previous[i].distance(observed[i]);
            if movement > jump_limit {
                trace!("corner {i} jumped {movement:.1}px, holding");
                continue;
            }
            *corner = previous[i].lerp(observed[i], self.alpha);
        }

        self.last = Some(Quad::from_corners(smoothed));
        self.last
    }
}
