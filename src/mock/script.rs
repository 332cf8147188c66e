use std::collections::VecDeque;

use shakmaty::{Chess, Position, Square};
use thiserror::Error;

use crate::occupancy::OccupancyGrid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid square notation: '{0}'")]
pub struct ParseError(String);

/// Occupancy readings driven by a small toggle script instead of a camera.
///
/// Script format:
/// - squares are two characters (`e2`, `a1`), optionally space separated
/// - every square named toggles between occupied and empty
/// - a period ends a batch; each batch is one observable board change
///
/// `"e2e4."` moves a piece from e2 to e4 in one change, `"e2. e4."` lifts it
/// and puts it down as two changes. A capture such as `"d5. e4d5."` removes
/// the captured piece first, then toggles both squares of the capturing move.
#[derive(Debug, Clone)]
pub struct ScriptedBoard {
    grid: OccupancyGrid,
    pending: VecDeque<Vec<Square>>,
}

impl Default for ScriptedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBoard {
    /// Board set up for a new game.
    pub fn new() -> Self {
        Self::from_grid(OccupancyGrid::from(Chess::default().board().occupied()))
    }

    pub fn from_grid(grid: OccupancyGrid) -> Self {
        Self {
            grid,
            pending: VecDeque::new(),
        }
    }

    /// Current reading.
    #[inline]
    pub fn grid(&self) -> OccupancyGrid {
        self.grid
    }

    /// Replace the board outright, dropping queued changes.
    pub fn load_grid(&mut self, grid: OccupancyGrid) {
        self.grid = grid;
        self.pending.clear();
    }

    /// Queue the changes in `script`. Nothing is queued if any square is invalid.
    pub fn push_script(&mut self, script: &str) -> Result<(), ParseError> {
        let batches = parse_script(script)?;
        self.pending.extend(batches);
        Ok(())
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply the next queued change, returning the new reading.
    pub fn tick(&mut self) -> Option<OccupancyGrid> {
        let batch = self.pending.pop_front()?;
        for square in batch {
            self.grid.toggle(square);
        }
        Some(self.grid)
    }

    /// Apply every queued change, calling `on_tick` after each.
    pub fn drain<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(OccupancyGrid),
    {
        while let Some(grid) = self.tick() {
            on_tick(grid);
        }
    }
}

fn parse_script(script: &str) -> Result<Vec<Vec<Square>>, ParseError> {
    let mut batches: Vec<Vec<Square>> = vec![Vec::new()];
    let mut token = String::new();

    for ch in script.chars() {
        match ch {
            '.' => {
                flush_token(&mut token, &mut batches)?;
                batches.push(Vec::new());
            }
            c if c.is_whitespace() => flush_token(&mut token, &mut batches)?,
            c => {
                token.push(c);
                if token.len() == 2 {
                    flush_token(&mut token, &mut batches)?;
                }
            }
        }
    }
    flush_token(&mut token, &mut batches)?;

    batches.retain(|batch| !batch.is_empty());
    Ok(batches)
}

fn flush_token(token: &mut String, batches: &mut Vec<Vec<Square>>) -> Result<(), ParseError> {
    if token.is_empty() {
        return Ok(());
    }
    let square: Square = token.parse().map_err(|_| ParseError(token.clone()))?;
    match batches.last_mut() {
        Some(batch) => batch.push(square),
        None => batches.push(vec![square]),
    }
    token.clear();
    Ok(())
}
