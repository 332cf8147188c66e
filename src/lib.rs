use image::RgbImage;

pub mod config;
pub mod engine;
pub mod feedback;
pub mod frames;
pub mod game_logic;
pub mod geometry;
pub mod mock;
pub mod occupancy;
pub mod pipeline;
pub mod vision;

/// Source of camera frames.
///
/// Abstracts over live cameras, recorded image sequences and synthetic
/// renders, providing a uniform interface for the frame pipeline.
pub trait FrameSource {
    /// Error type for frame read failures. These are treated as transient.
    type Error: std::fmt::Debug + std::fmt::Display;

    /// Next frame, or `None` once the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

/// Trait for displaying board feedback to the player.
///
/// The output side of the game loop, e.g. a terminal view of the board.
/// Mirrors [`FrameSource`] on the input side.
pub trait BoardDisplay {
    /// Error type for display update failures.
    type Error: std::fmt::Debug + std::fmt::Display;

    /// Show the given feedback state on the display.
    ///
    /// Implementations map [`feedback::SquareFeedback`] variants
    /// to output-specific styling such as terminal colors.
    fn show(&mut self, feedback: &feedback::BoardFeedback) -> Result<(), Self::Error>;
}
