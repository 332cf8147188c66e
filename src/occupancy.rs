use std::fmt;

use shakmaty::{Bitboard, File, Rank, Square};

/// Which squares currently hold a piece, independent of piece identity.
///
/// Addressed either by [`Square`] or by vision grid coordinates, where row 0
/// is rank 8 (far side of the warped image) and column 0 is file a.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OccupancyGrid(Bitboard);

impl OccupancyGrid {
    pub const EMPTY: Self = Self(Bitboard::EMPTY);

    #[inline]
    pub const fn from_bitboard(bitboard: Bitboard) -> Self {
        Self(bitboard)
    }

    /// Build from an 8×8 row-major matrix (row 0 = rank 8).
    pub fn from_rows(rows: [[bool; 8]; 8]) -> Self {
        let mut bitboard = Bitboard::EMPTY;
        for (row, cells) in rows.iter().enumerate() {
            for (col, occupied) in cells.iter().enumerate() {
                if *occupied {
                    bitboard.toggle(square_at(row, col));
                }
            }
        }
        Self(bitboard)
    }

    #[inline]
    pub fn bitboard(&self) -> Bitboard {
        self.0
    }

    #[inline]
    pub fn contains(&self, square: Square) -> bool {
        self.0.contains(square)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.0.contains(square_at(row, col))
    }

    #[inline]
    pub fn toggle(&mut self, square: Square) {
        self.0.toggle(square);
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.0.count()
    }

    /// Squares whose occupancy differs from `other`, in a1..h8 order.
    pub fn diff(&self, other: &OccupancyGrid) -> Vec<Square> {
        (self.0 ^ other.0).into_iter().collect()
    }

    pub fn to_rows(&self) -> [[bool; 8]; 8] {
        let mut rows = [[false; 8]; 8];
        for (row, cells) in rows.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                *cell = self.get(row, col);
            }
        }
        rows
    }
}

/// Square shown at vision grid coordinates.
///
/// Panics if `row` or `col` is outside `0..8`.
pub fn square_at(row: usize, col: usize) -> Square {
    assert!(row < 8 && col < 8, "grid coordinates out of range: ({row}, {col})");
    Square::from_coords(File::new(col as u32), Rank::new(7 - row as u32))
}

/// Vision grid coordinates `(row, col)` of a square.
pub fn row_col(square: Square) -> (usize, usize) {
    (7 - square.rank() as usize, square.file() as usize)
}

impl From<Bitboard> for OccupancyGrid {
    fn from(bitboard: Bitboard) -> Self {
        Self(bitboard)
    }
}

/// Text rendering: `X` occupied, `.` empty, files a-h across, ranks 8-1 down.
impl fmt::Display for OccupancyGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  a b c d e f g h")?;
        for row in 0..8 {
            write!(f, "{} ", 8 - row)?;
            for col in 0..8 {
                f.write_str(if self.get(row, col) { "X " } else { ". " })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OccupancyGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OccupancyGrid({:#018X})", self.0)
    }
}

/// Mean grey level per square of the top-down image, 0.0 (black) to 255.0.
///
/// Used to tell which side's piece stands on a square when occupancy alone
/// is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareBrightness([f32; 64]);

impl SquareBrightness {
    pub const fn uniform(level: f32) -> Self {
        Self([level; 64])
    }

    #[inline]
    pub fn get(&self, square: Square) -> f32 {
        self.0[square as usize]
    }

    #[inline]
    pub fn set(&mut self, square: Square, level: f32) {
        self.0[square as usize] = level;
    }

    /// Mean level over a set of squares, `None` if the set is empty.
    pub fn mean_over(&self, squares: Bitboard) -> Option<f32> {
        let count = squares.count();
        if count == 0 {
            return None;
        }
        let total: f32 = squares.into_iter().map(|sq| self.get(sq)).sum();
        Some(total / count as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{Chess, Position};
    use test_case::test_case;

    #[test_case(0, 0, Square::A8; "top left")]
    #[test_case(0, 7, Square::H8; "top right")]
    #[test_case(7, 0, Square::A1; "bottom left")]
    #[test_case(7, 7, Square::H1; "bottom right")]
    #[test_case(6, 4, Square::E2; "e2")]
    #[test_case(4, 3, Square::D4; "d4")]
    fn grid_coordinates_map_to_squares(row: usize, col: usize, square: Square) {
        assert_eq!(square_at(row, col), square);
        assert_eq!(row_col(square), (row, col));
    }

    #[test]
    fn starting_position_fills_outer_rows() {
        let grid = OccupancyGrid::from(Chess::default().board().occupied());
        let rows = grid.to_rows();

        for (row, cells) in rows.iter().enumerate() {
            let expected = !(2..6).contains(&row);
            assert!(cells.iter().all(|c| *c == expected), "row {row}");
        }
        assert_eq!(OccupancyGrid::from_rows(rows), grid);
    }

    #[test]
    fn diff_lists_changed_squares() {
        let start = OccupancyGrid::from(Chess::default().board().occupied());
        let mut moved = start;
        moved.toggle(Square::E2);
        moved.toggle(Square::E4);

        assert_eq!(start.diff(&moved), vec![Square::E2, Square::E4]);
        assert!(start.diff(&start).is_empty());
    }

    #[test]
    fn brightness_mean_over_squares() {
        let mut brightness = SquareBrightness::uniform(100.0);
        brightness.set(Square::E4, 200.0);

        let squares = Bitboard::from(Square::E4) | Bitboard::from(Square::D4);
        assert_eq!(brightness.mean_over(squares), Some(150.0));
        assert_eq!(brightness.mean_over(Bitboard::EMPTY), None);
    }

    #[test]
    fn display_marks_occupied_squares() {
        let mut grid = OccupancyGrid::EMPTY;
        grid.toggle(Square::A8);
        grid.toggle(Square::H1);

        let text = grid.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  a b c d e f g h");
        assert_eq!(lines[1], "8 X . . . . . . . ");
        assert_eq!(lines[8], "1 . . . . . . . X ");
    }
}
