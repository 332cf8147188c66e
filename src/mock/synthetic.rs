use std::convert::Infallible;

use image::{Rgb, RgbImage};
use shakmaty::{Bitboard, Chess, Color, Position, Square};

use crate::FrameSource;
use crate::geometry::{Point, Quad};
use crate::occupancy::{OccupancyGrid, row_col};

const BACKGROUND: Rgb<u8> = Rgb([25, 25, 30]);
const SURFACE: Rgb<u8> = Rgb([128, 128, 128]);
const WHITE_PIECE: Rgb<u8> = Rgb([240, 240, 235]);
const BLACK_PIECE: Rgb<u8> = Rgb([15, 15, 20]);

/// Renders camera frames of a plain board seen straight from above.
///
/// Pieces are striped discs, light for White and dark for Black, so both the
/// texture and the brightness based readings can be exercised. The board sits
/// axis-aligned inside a larger dark frame.
#[derive(Debug, Clone)]
pub struct SyntheticBoard {
    white: Bitboard,
    black: Bitboard,
    frame: (u32, u32),
    origin: (u32, u32),
    side: u32,
    frames_left: Option<usize>,
}

impl SyntheticBoard {
    /// A 400 px board in a 640×480 frame, set up as `position`.
    pub fn new(position: &Chess) -> Self {
        let mut board = Self {
            white: Bitboard::EMPTY,
            black: Bitboard::EMPTY,
            frame: (640, 480),
            origin: (120, 40),
            side: 400,
            frames_left: None,
        };
        board.set_position(position);
        board
    }

    /// Board placement inside the frame.
    pub fn with_layout(mut self, frame: (u32, u32), origin: (u32, u32), side: u32) -> Self {
        self.frame = frame;
        self.origin = origin;
        self.side = side;
        self
    }

    /// Stop yielding frames after `frames` reads.
    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frames_left = Some(frames);
        self
    }

    pub fn set_position(&mut self, position: &Chess) {
        let board = position.board();
        self.white = board.by_color(Color::White);
        self.black = board.by_color(Color::Black);
    }

    /// Pick up whatever stands on `square`.
    pub fn lift(&mut self, square: Square) {
        self.white.discard(square);
        self.black.discard(square);
    }

    /// Put a piece of `color` on `square`, replacing any piece there.
    pub fn place(&mut self, square: Square, color: Color) {
        self.lift(square);
        match color {
            Color::White => self.white.add(square),
            Color::Black => self.black.add(square),
        }
    }

    pub fn grid(&self) -> OccupancyGrid {
        OccupancyGrid::from(self.white | self.black)
    }

    /// Where the board's corners appear in the frame.
    pub fn corners(&self) -> Quad {
        let (x0, y0) = (self.origin.0 as i32, self.origin.1 as i32);
        let (x1, y1) = (x0 + self.side as i32, y0 + self.side as i32);
        Quad::from_corners([
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
    }

    pub fn render(&self) -> RgbImage {
        self.draw(self.white, self.black)
    }

    /// The same frame with every piece removed.
    pub fn render_empty(&self) -> RgbImage {
        self.draw(Bitboard::EMPTY, Bitboard::EMPTY)
    }

    fn draw(&self, white: Bitboard, black: Bitboard) -> RgbImage {
        let (ox, oy) = self.origin;
        let side = self.side;
        let cell = f64::from(side) / 8.0;
        let mut pieces = [None; 64];
        for square in white {
            pieces[grid_index(square)] = Some(WHITE_PIECE);
        }
        for square in black {
            pieces[grid_index(square)] = Some(BLACK_PIECE);
        }

        RgbImage::from_fn(self.frame.0, self.frame.1, |x, y| {
            if x < ox || y < oy || x >= ox + side || y >= oy + side {
                return BACKGROUND;
            }
            let (bx, by) = (f64::from(x - ox), f64::from(y - oy));
            let (row, col) = ((by / cell) as usize, (bx / cell) as usize);
            let Some(colour) = pieces[row.min(7) * 8 + col.min(7)] else {
                return SURFACE;
            };
            // Position within the square, 0..1 each way.
            let (u, v) = (bx / cell - col as f64, by / cell - row as f64);
            let inside = (u - 0.5).powi(2) + (v - 0.5).powi(2) <= 0.3 * 0.3;
            let stripe = ((v * 16.0) as u32) % 2 == 0;
            if inside && stripe { colour } else { SURFACE }
        })
    }
}

fn grid_index(square: Square) -> usize {
    let (row, col) = row_col(square);
    row * 8 + col
}

impl FrameSource for SyntheticBoard {
    type Error = Infallible;

    fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
        match &mut self.frames_left {
            Some(0) => return Ok(None),
            Some(left) => *left -= 1,
            None => {}
        }
        Ok(Some(self.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pieces_are_drawn_in_their_squares() {
        let board = SyntheticBoard::new(&Chess::default());
        let frame = board.render();
        // e1 holds a white piece: its centre stripe is light.
        let (x, y) = (120 + 4 * 50 + 25, 40 + 7 * 50 + 25);
        assert_eq!(frame.get_pixel(x, y), &WHITE_PIECE);
        // e4 is empty.
        assert_eq!(frame.get_pixel(x, 40 + 4 * 50 + 25), &SURFACE);
        assert_eq!(frame.get_pixel(5, 5), &BACKGROUND);
    }

    #[test]
    fn lift_and_place_update_grid() {
        let mut board = SyntheticBoard::new(&Chess::default());
        board.lift(Square::E2);
        board.place(Square::E4, Color::White);

        assert!(!board.grid().contains(Square::E2));
        assert!(board.grid().contains(Square::E4));
        assert_eq!(board.grid().count(), 32);
    }

    #[test]
    fn frame_limit_ends_source() {
        let mut board = SyntheticBoard::new(&Chess::default()).with_frame_limit(2);
        assert!(matches!(board.read_frame(), Ok(Some(_))));
        assert!(matches!(board.read_frame(), Ok(Some(_))));
        assert!(matches!(board.read_frame(), Ok(None)));
    }
}
