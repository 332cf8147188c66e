use shakmaty::{Bitboard, CastlingMode, Move, Square, uci::UciMove};

/// Highlight for an individual square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SquareFeedback {
    /// Legal destination for the lifted piece
    Destination,
    /// Placing the lifted piece here captures
    Capture,
    /// Square a piece was lifted from, or can capture from
    Origin,
    /// Board disagrees with the game here and no legal move explains it
    Invalid,
    /// Origin of the engine's recommended move
    RecommendFrom,
    /// Destination of the engine's recommended move
    RecommendTo,
    /// King in check
    Check,
    /// Piece giving check
    Checker,
}

/// Squares to highlight and how, as consumed by a [`crate::BoardDisplay`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardFeedback {
    squares: Vec<(Square, SquareFeedback)>,
}

impl BoardFeedback {
    #[inline]
    pub const fn new() -> Self {
        Self {
            squares: Vec::new(),
        }
    }

    #[inline]
    pub fn squares(&self) -> &[(Square, SquareFeedback)] {
        &self.squares
    }

    #[inline]
    pub fn get(&self, square: Square) -> Option<SquareFeedback> {
        self.squares
            .iter()
            .find(|(sq, _)| *sq == square)
            .map(|(_, feedback)| *feedback)
    }

    /// Highlight `square`, replacing any earlier highlight there.
    pub fn set(&mut self, square: Square, feedback: SquareFeedback) {
        match self.squares.iter_mut().find(|(sq, _)| *sq == square) {
            Some(entry) => entry.1 = feedback,
            None => self.squares.push((square, feedback)),
        }
    }

    /// Highlight `square` unless it already carries a highlight.
    fn set_if_unmarked(&mut self, square: Square, feedback: SquareFeedback) {
        if self.get(square).is_none() {
            self.squares.push((square, feedback));
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.squares.is_empty()
    }
}

impl From<Vec<(Square, SquareFeedback)>> for BoardFeedback {
    fn from(squares: Vec<(Square, SquareFeedback)>) -> Self {
        Self { squares }
    }
}

/// The side to move is in check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInfo {
    pub king_square: Square,
    pub checkers: Bitboard,
}

/// What the feedback layer needs to know about the game.
pub trait FeedbackSource {
    fn legal_moves(&self) -> &[Move];

    /// Square of a piece of the side to move that the camera no longer sees
    fn lifted_piece(&self) -> Option<Square>;

    /// Square of an opponent piece the camera no longer sees
    fn captured_piece(&self) -> Option<Square>;

    /// Squares flagged after an unexplained board change
    fn invalid_squares(&self) -> &[Square];

    fn recommendation(&self) -> Option<Move>;

    fn check_info(&self) -> Option<CheckInfo>;
}

/// Compute highlights for the current game state.
///
/// An invalid board hides everything else until it is corrected. Otherwise a
/// lifted or removed piece shows move guidance, and with nothing lifted the
/// engine's recommendation is shown. Check is marked on squares not already
/// highlighted.
pub fn compute_feedback(source: &impl FeedbackSource) -> BoardFeedback {
    let invalid = source.invalid_squares();
    if !invalid.is_empty() {
        return invalid
            .iter()
            .map(|sq| (*sq, SquareFeedback::Invalid))
            .collect::<Vec<_>>()
            .into();
    }

    let moves = source.legal_moves();
    let mut feedback = BoardFeedback::new();
    match (source.lifted_piece(), source.captured_piece()) {
        (Some(from), None) => {
            feedback.set(from, SquareFeedback::Origin);
            for mv in moves.iter().filter(|mv| mv.from() == Some(from)) {
                let kind = if mv.is_capture() {
                    SquareFeedback::Capture
                } else {
                    SquareFeedback::Destination
                };
                feedback.set_if_unmarked(mv.to(), kind);
            }
        }
        (None, Some(taken)) => {
            for mv in moves.iter().filter(|mv| captures_on(mv, taken)) {
                feedback.set_if_unmarked(mv.to(), SquareFeedback::Destination);
                if let Some(from) = mv.from() {
                    feedback.set_if_unmarked(from, SquareFeedback::Origin);
                }
            }
        }
        (Some(from), Some(taken)) => {
            feedback.set(from, SquareFeedback::Origin);
            for mv in moves
                .iter()
                .filter(|mv| mv.from() == Some(from) && captures_on(mv, taken))
            {
                feedback.set_if_unmarked(mv.to(), SquareFeedback::Destination);
            }
        }
        (None, None) => {
            if let Some((from, to)) = source.recommendation().and_then(|mv| move_squares(&mv)) {
                feedback.set(from, SquareFeedback::RecommendFrom);
                feedback.set(to, SquareFeedback::RecommendTo);
            }
        }
    }

    if let Some(check) = source.check_info() {
        feedback.set_if_unmarked(check.king_square, SquareFeedback::Check);
        for checker in check.checkers {
            feedback.set_if_unmarked(checker, SquareFeedback::Checker);
        }
    }
    feedback
}

/// Origin and destination as a player sees them; castling is king from/to.
pub fn move_squares(mv: &Move) -> Option<(Square, Square)> {
    match mv.to_uci(CastlingMode::Standard) {
        UciMove::Normal { from, to, .. } => Some((from, to)),
        UciMove::Put { to, .. } => Some((to, to)),
        UciMove::Null => None,
    }
}

/// Whether `mv` removes the piece standing on `square`.
fn captures_on(mv: &Move, square: Square) -> bool {
    match mv {
        Move::Normal {
            capture: Some(_),
            to,
            ..
        } => *to == square,
        // The captured pawn stands beside the destination, on the mover's rank.
        Move::EnPassant { from, to } => Square::from_coords(to.file(), from.rank()) == square,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{Chess, Position, fen::Fen};

    #[derive(Default)]
    struct Source {
        moves: Vec<Move>,
        lifted: Option<Square>,
        captured: Option<Square>,
        invalid: Vec<Square>,
        recommendation: Option<Move>,
        check: Option<CheckInfo>,
    }

    impl FeedbackSource for Source {
        fn legal_moves(&self) -> &[Move] {
            &self.moves
        }

        fn lifted_piece(&self) -> Option<Square> {
            self.lifted
        }

        fn captured_piece(&self) -> Option<Square> {
            self.captured
        }

        fn invalid_squares(&self) -> &[Square] {
            &self.invalid
        }

        fn recommendation(&self) -> Option<Move> {
            self.recommendation
        }

        fn check_info(&self) -> Option<CheckInfo> {
            self.check
        }
    }

    fn moves_of(fen: &str) -> Vec<Move> {
        let pos: Chess = fen
            .parse::<Fen>()
            .expect("valid FEN")
            .into_position(CastlingMode::Standard)
            .expect("valid position");
        pos.legal_moves().into_iter().collect()
    }

    fn find(moves: &[Move], uci: &str) -> Move {
        *moves
            .iter()
            .find(|mv| mv.to_uci(CastlingMode::Standard).to_string() == uci)
            .expect("move present")
    }

    #[test]
    fn quiet_board_has_no_feedback() {
        let source = Source {
            moves: Chess::default().legal_moves().into_iter().collect(),
            ..Source::default()
        };
        assert!(compute_feedback(&source).is_empty());
    }

    #[test]
    fn lifted_piece_shows_destinations() {
        let source = Source {
            moves: Chess::default().legal_moves().into_iter().collect(),
            lifted: Some(Square::E2),
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::E2), Some(SquareFeedback::Origin));
        assert_eq!(feedback.get(Square::E3), Some(SquareFeedback::Destination));
        assert_eq!(feedback.get(Square::E4), Some(SquareFeedback::Destination));
        assert_eq!(feedback.get(Square::D2), None);
    }

    #[test]
    fn lifted_piece_distinguishes_captures() {
        let source = Source {
            moves: moves_of("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1"),
            lifted: Some(Square::E4),
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::E5), Some(SquareFeedback::Destination));
        assert_eq!(feedback.get(Square::D5), Some(SquareFeedback::Capture));
    }

    #[test]
    fn removed_opponent_piece_shows_capturers() {
        let source = Source {
            moves: moves_of("rnbqkbnr/ppp1pppp/8/3p4/4P3/2N5/PPPP1PPP/R1BQKBNR w KQkq - 0 1"),
            captured: Some(Square::D5),
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::D5), Some(SquareFeedback::Destination));
        assert_eq!(feedback.get(Square::E4), Some(SquareFeedback::Origin));
        assert_eq!(feedback.get(Square::C3), Some(SquareFeedback::Origin));
    }

    #[test]
    fn en_passant_capture_completion() {
        let source = Source {
            moves: moves_of("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 1"),
            lifted: Some(Square::E5),
            captured: Some(Square::D5),
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::E5), Some(SquareFeedback::Origin));
        assert_eq!(feedback.get(Square::D6), Some(SquareFeedback::Destination));
        assert_eq!(feedback.get(Square::E6), None);
    }

    #[test]
    fn invalid_squares_hide_everything_else() {
        let moves: Vec<Move> = Chess::default().legal_moves().into_iter().collect();
        let source = Source {
            recommendation: Some(find(&moves, "e2e4")),
            moves,
            lifted: Some(Square::G1),
            invalid: vec![Square::E2, Square::E5],
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(
            feedback.squares(),
            &[(Square::E2, SquareFeedback::Invalid), (Square::E5, SquareFeedback::Invalid)]
        );
    }

    #[test]
    fn castling_recommendation_marks_king_squares() {
        let moves = moves_of("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1");
        let source = Source {
            recommendation: Some(find(&moves, "e1g1")),
            moves,
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::E1), Some(SquareFeedback::RecommendFrom));
        assert_eq!(feedback.get(Square::G1), Some(SquareFeedback::RecommendTo));
        assert_eq!(feedback.get(Square::H1), None);
    }

    #[test]
    fn check_marks_king_and_checkers() {
        let source = Source {
            check: Some(CheckInfo {
                king_square: Square::E8,
                checkers: Bitboard::from(Square::H5),
            }),
            ..Source::default()
        };
        let feedback = compute_feedback(&source);

        assert_eq!(feedback.get(Square::E8), Some(SquareFeedback::Check));
        assert_eq!(feedback.get(Square::H5), Some(SquareFeedback::Checker));
    }

    #[test]
    fn set_replaces_existing_highlight() {
        let mut feedback = BoardFeedback::new();
        feedback.set(Square::A1, SquareFeedback::Origin);
        feedback.set(Square::A1, SquareFeedback::Invalid);

        assert_eq!(feedback.squares(), &[(Square::A1, SquareFeedback::Invalid)]);
    }
}
