//! Frame-level image processing: edge map, board outline, perspective warp
//! and per-square occupancy.

mod contours;
mod edges;
mod localizer;
mod sensor;
mod warp;

pub use contours::{approx_polygon, find_contours};
pub use edges::{Gradient, canny, dilate, preprocess};
pub use localizer::{BoardLocalizer, BoardSmoother};
pub use sensor::{OccupancySensor, SquareMetrics, clahe};
pub use warp::{Homography, warp_board};
