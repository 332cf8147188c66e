use log::debug;
use shakmaty::{Bitboard, Chess, Move, Position, Role, Square};
use thiserror::Error;

use crate::occupancy::{OccupancyGrid, SquareBrightness};

/// No legal move turns the current position into the observed board.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no legal move matches the observed board (differs on {})", format_squares(.squares))]
pub struct NoMatch {
    /// Squares where the observed board differs from the current position.
    pub squares: Vec<Square>,
}

/// Space-separated algebraic square names, e.g. `"e2 e5"`.
pub fn format_squares(squares: &[Square]) -> String {
    squares
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the legal move that explains an observed occupancy change.
///
/// Every legal move is simulated and kept if the resulting occupancy equals
/// `observed`. Castling, en passant and promotion need no special casing.
///
/// Several moves can produce the same occupancy: the four promotion choices,
/// or one piece capturing on any of several squares. Queen promotions are
/// preferred; remaining ties go to the candidate whose destination looks most
/// like the mover's pieces in `hints`, then to the first enumerated move.
pub fn infer(
    position: &Chess,
    observed: OccupancyGrid,
    hints: Option<&SquareBrightness>,
) -> Result<Move, NoMatch> {
    let mut candidates: Vec<Move> = position
        .legal_moves()
        .into_iter()
        .filter(|mv| occupancy_after(position, *mv) == observed)
        .collect();

    if candidates.is_empty() {
        let expected = OccupancyGrid::from(position.board().occupied());
        return Err(NoMatch {
            squares: expected.diff(&observed),
        });
    }

    if candidates.iter().any(|mv| mv.promotion() == Some(Role::Queen)) {
        candidates.retain(|mv| mv.promotion().is_none_or(|role| role == Role::Queen));
    }
    if candidates.len() > 1 {
        debug!("{} moves match the board, breaking tie", candidates.len());
        let picked =
            hints.and_then(|hints| pick_by_brightness(position, observed, &candidates, hints));
        if let Some(mv) = picked {
            return Ok(mv);
        }
    }
    Ok(candidates[0])
}

/// Occupancy of the board after playing `mv`.
pub fn occupancy_after(position: &Chess, mv: Move) -> OccupancyGrid {
    let mut after = position.clone();
    after.play_unchecked(mv);
    OccupancyGrid::from(after.board().occupied())
}

/// Candidate whose destination is closest in brightness to the mover's
/// pieces and furthest from the opponent's.
fn pick_by_brightness(
    position: &Chess,
    observed: OccupancyGrid,
    candidates: &[Move],
    hints: &SquareBrightness,
) -> Option<Move> {
    let destinations: Bitboard = candidates.iter().map(|mv| mv.to()).collect();
    let mover = hints.mean_over(position.us() & observed.bitboard());
    let opponent = hints.mean_over(position.them() & !destinations);

    let score = |mv: &Move| {
        let level = hints.get(mv.to());
        match (mover, opponent) {
            (Some(m), Some(o)) => Some((level - m).abs() - (level - o).abs()),
            (Some(m), None) => Some((level - m).abs()),
            (None, Some(o)) => Some(-(level - o).abs()),
            (None, None) => None,
        }
    };

    candidates
        .iter()
        .filter_map(|mv| score(mv).map(|s| (*mv, s)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(mv, _)| mv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{CastlingMode, fen::Fen};
    use test_case::test_case;

    fn position(fen: &str) -> Chess {
        fen.parse::<Fen>()
            .expect("invalid FEN")
            .into_position(CastlingMode::Standard)
            .expect("invalid position")
    }

    fn grid_after(position: &Chess, uci: &str) -> OccupancyGrid {
        let mv = uci
            .parse::<shakmaty::uci::UciMove>()
            .expect("invalid UCI")
            .to_move(position)
            .expect("illegal move");
        occupancy_after(position, mv)
    }

    fn uci(mv: Move) -> String {
        mv.to_uci(CastlingMode::Standard).to_string()
    }

    #[test]
    fn pawn_push_from_start() {
        let start = Chess::default();
        let mut observed = OccupancyGrid::from(start.board().occupied());
        observed.toggle(Square::E2);
        observed.toggle(Square::E4);

        let mv = infer(&start, observed, None).expect("e2e4 matches");
        assert_eq!(uci(mv), "e2e4");
    }

    #[test_case("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1", "e1g1"; "king side castle")]
    #[test_case("r1bqkbnr/ppp3pp/2n1pp2/3p4/3P1B2/2NQ4/PPP1PPPP/R3KBNR w KQkq - 0 1", "e1c1"; "queen side castle")]
    #[test_case("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 1", "e5d6"; "en passant")]
    #[test_case("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 1", "e5e6"; "push beside en passant")]
    #[test_case("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1", "e4d5"; "pawn capture")]
    #[test_case("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1", "g8f6"; "black knight")]
    fn special_moves_are_recognised(fen: &str, expected: &str) {
        let pos = position(fen);
        let observed = grid_after(&pos, expected);
        assert_eq!(uci(infer(&pos, observed, None).expect("match")), expected);
    }

    #[test]
    fn promotion_prefers_queen() {
        let pos = position("r1bqkbnr/pPpppppp/2n5/8/8/8/PP1PPPPP/RNBQKBNR w KQkq - 0 1");
        let observed = grid_after(&pos, "b7b8n");

        let mv = infer(&pos, observed, None).expect("promotion matches");
        assert_eq!(mv.promotion(), Some(Role::Queen));
        assert_eq!(mv.to(), Square::B8);
    }

    fn knight_fork_hints(bright_target: Square, dark_target: Square) -> SquareBrightness {
        let mut hints = SquareBrightness::uniform(120.0);
        hints.set(Square::E1, 220.0);
        hints.set(Square::E8, 40.0);
        hints.set(bright_target, 220.0);
        hints.set(dark_target, 40.0);
        hints
    }

    #[test_case(Square::E6, Square::C6; "lands on e6")]
    #[test_case(Square::C6, Square::E6; "lands on c6")]
    fn ambiguous_capture_resolved_by_brightness(landed: Square, untouched: Square) {
        // Nxc6 and Nxe6 both leave d4 empty and everything else occupied.
        let pos = position("4k3/8/2p1p3/8/3N4/8/8/4K3 w - - 0 1");
        let mut observed = OccupancyGrid::from(pos.board().occupied());
        observed.toggle(Square::D4);

        let hints = knight_fork_hints(landed, untouched);
        let mv = infer(&pos, observed, Some(&hints)).expect("capture matches");
        assert_eq!(mv.from(), Some(Square::D4));
        assert_eq!(mv.to(), landed);
    }

    #[test]
    fn ambiguous_capture_without_hints_takes_first_match() {
        let pos = position("4k3/8/2p1p3/8/3N4/8/8/4K3 w - - 0 1");
        let mut observed = OccupancyGrid::from(pos.board().occupied());
        observed.toggle(Square::D4);

        let first = pos
            .legal_moves()
            .into_iter()
            .find(|mv| occupancy_after(&pos, *mv) == observed)
            .expect("some capture matches");
        assert_eq!(infer(&pos, observed, None), Ok(first));
    }

    #[test]
    fn unmatched_board_reports_differing_squares() {
        let start = Chess::default();
        let mut observed = OccupancyGrid::from(start.board().occupied());
        observed.toggle(Square::E2);
        observed.toggle(Square::E5);

        let err = infer(&start, observed, None).expect_err("e2e5 is illegal");
        assert_eq!(err.squares, vec![Square::E2, Square::E5]);
        assert!(err.to_string().contains("e2 e5"));
    }

    #[test_case("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"; "start")]
    #[test_case("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1"; "italian")]
    #[test_case("r3k2r/pPppqppp/2n2n2/4p3/2B1P3/5N2/PPP2PPP/R3K2R b KQkq - 0 1"; "black to move with castling")]
    #[test_case("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 1"; "en passant available")]
    fn applying_inferred_move_reproduces_observation(fen: &str) {
        let pos = position(fen);
        for mv in pos.legal_moves() {
            let observed = occupancy_after(&pos, mv);
            let inferred = infer(&pos, observed, None).expect("every legal move is explained");
            assert_eq!(occupancy_after(&pos, inferred), observed, "{}", uci(mv));
        }
    }
}
