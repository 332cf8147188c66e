use std::io::{self, Write};

use shakmaty::{File, Rank, Square};

use crate::BoardDisplay;
use crate::feedback::{BoardFeedback, SquareFeedback};
use crate::occupancy::OccupancyGrid;

/// Terminal board display for development and testing.
///
/// Renders [`BoardFeedback`] as an 8×8 grid of ANSI colored cells. When an
/// occupancy reading is attached with [`TerminalDisplay::set_occupancy`],
/// occupied squares show a piece marker.
#[derive(Debug, Default)]
pub struct TerminalDisplay {
    occupancy: Option<OccupancyGrid>,
}

impl TerminalDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_occupancy(&mut self, occupancy: Option<OccupancyGrid>) {
        self.occupancy = occupancy;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("failed to write to terminal: {0}")]
    Io(#[from] io::Error),
}

impl BoardDisplay for TerminalDisplay {
    type Error = DisplayError;

    fn show(&mut self, feedback: &BoardFeedback) -> Result<(), Self::Error> {
        render_feedback(&mut io::stdout(), feedback, self.occupancy)
    }
}

pub(crate) fn render_feedback(
    w: &mut impl Write,
    feedback: &BoardFeedback,
    occupancy: Option<OccupancyGrid>,
) -> Result<(), DisplayError> {
    for rank in Rank::ALL.iter().rev() {
        write!(w, " {} ", rank.char())?;
        for file in File::ALL {
            let square = Square::from_coords(file, *rank);
            let occupied = occupancy.is_some_and(|grid| grid.contains(square));
            let (style, mark) = cell(feedback.get(square), occupied);
            match style {
                Some(style) => write!(w, "\x1b[{style}m{mark}\x1b[0m")?,
                None => write!(w, "{mark}")?,
            }
        }
        writeln!(w)?;
    }
    writeln!(w, "    a  b  c  d  e  f  g  h")?;
    w.flush()?;
    Ok(())
}

/// ANSI background code and cell text for a square.
fn cell(feedback: Option<SquareFeedback>, occupied: bool) -> (Option<&'static str>, &'static str) {
    let mark = if occupied { " ● " } else { " · " };
    match feedback {
        Some(SquareFeedback::Destination) => (Some("44"), mark),
        Some(SquareFeedback::Capture) => (Some("41"), mark),
        Some(SquareFeedback::Origin) => (Some("42"), mark),
        Some(SquareFeedback::Check) => (Some("45"), mark),
        Some(SquareFeedback::Checker) => (Some("43"), mark),
        Some(SquareFeedback::Invalid) => (Some("101"), " ! "),
        Some(SquareFeedback::RecommendFrom) => (Some("46"), mark),
        Some(SquareFeedback::RecommendTo) => (Some("106"), mark),
        None => (None, mark),
    }
}
