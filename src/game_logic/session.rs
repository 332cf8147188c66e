use std::collections::HashMap;
use std::fmt;

use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position, Square,
    fen::{Epd, Fen},
};
use thiserror::Error;

use crate::feedback::CheckInfo;
use crate::occupancy::OccupancyGrid;

/// A move the rules engine refused for the current position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("move {uci} is not legal in {fen}")]
pub struct IllegalMove {
    pub uci: String,
    pub fen: String,
}

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameOutcome {
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    SeventyFiveMoveRule,
    FivefoldRepetition,
}

impl GameOutcome {
    #[inline]
    pub fn winner(&self) -> Option<Color> {
        match self {
            Self::Checkmate { winner } => Some(*winner),
            _ => None,
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkmate { winner: Color::White } => f.write_str("White wins (checkmate)"),
            Self::Checkmate { winner: Color::Black } => f.write_str("Black wins (checkmate)"),
            Self::Stalemate => f.write_str("Draw (stalemate)"),
            Self::InsufficientMaterial => f.write_str("Draw (insufficient material)"),
            Self::SeventyFiveMoveRule => f.write_str("Draw (seventy-five-move rule)"),
            Self::FivefoldRepetition => f.write_str("Draw (fivefold repetition)"),
        }
    }
}

/// One game from start to finish: the authoritative position plus who plays what.
#[derive(Clone)]
pub struct GameSession {
    id: u64,
    position: Chess,
    human: Color,
    ply: u32,
    /// Occurrences of each position, keyed by EPD (no move counters).
    seen: HashMap<String, u32>,
}

impl GameSession {
    /// Standard starting position.
    #[inline]
    pub fn new(id: u64, human: Color) -> Self {
        Self::from_position(id, Chess::default(), human)
    }

    pub fn from_position(id: u64, position: Chess, human: Color) -> Self {
        let mut session = Self {
            id,
            position,
            human,
            ply: 0,
            seen: HashMap::new(),
        };
        session.record_position();
        session
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn position(&self) -> &Chess {
        &self.position
    }

    #[inline]
    pub fn human(&self) -> Color {
        self.human
    }

    /// Moves applied in this session.
    #[inline]
    pub fn ply(&self) -> u32 {
        self.ply
    }

    #[inline]
    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    #[inline]
    pub fn is_human_turn(&self) -> bool {
        self.position.turn() == self.human
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    /// Occupancy the physical board should show.
    #[inline]
    pub fn expected_occupancy(&self) -> OccupancyGrid {
        OccupancyGrid::from(self.position.board().occupied())
    }

    #[inline]
    pub fn legal_moves(&self) -> MoveList {
        self.position.legal_moves()
    }

    /// King in check and the pieces giving it, if the side to move is in check.
    pub fn check_info(&self) -> Option<CheckInfo> {
        let checkers = self.position.checkers();
        if checkers.is_empty() {
            return None;
        }
        let king_square: Square = self.position.board().king_of(self.position.turn())?;
        Some(CheckInfo {
            king_square,
            checkers,
        })
    }

    /// Play a move after checking it against the rules engine.
    pub fn apply(&mut self, mv: Move) -> Result<(), IllegalMove> {
        if !self.position.legal_moves().contains(&mv) {
            return Err(IllegalMove {
                uci: mv.to_uci(CastlingMode::Standard).to_string(),
                fen: self.fen(),
            });
        }
        self.position.play_unchecked(mv);
        self.ply += 1;
        self.record_position();
        Ok(())
    }

    /// Terminal state of the current position, if any.
    pub fn outcome(&self) -> Option<GameOutcome> {
        let pos = &self.position;
        if pos.is_checkmate() {
            Some(GameOutcome::Checkmate {
                winner: !pos.turn(),
            })
        } else if pos.is_stalemate() {
            Some(GameOutcome::Stalemate)
        } else if pos.is_insufficient_material() {
            Some(GameOutcome::InsufficientMaterial)
        } else if pos.halfmoves() >= 150 {
            Some(GameOutcome::SeventyFiveMoveRule)
        } else if self.repetitions() >= 5 {
            Some(GameOutcome::FivefoldRepetition)
        } else {
            None
        }
    }

    /// How often the current position has occurred in this session.
    pub fn repetitions(&self) -> u32 {
        self.seen.get(&self.epd()).copied().unwrap_or(0)
    }

    fn epd(&self) -> String {
        Epd::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    fn record_position(&mut self) {
        *self.seen.entry(self.epd()).or_insert(0) += 1;
    }
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("id", &self.id)
            .field("position", &self.fen())
            .field("human", &self.human)
            .field("ply", &self.ply)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::uci::UciMove;
    use test_case::test_case;

    fn session_from(fen: &str) -> GameSession {
        let position: Chess = fen
            .parse::<Fen>()
            .expect("invalid FEN")
            .into_position(CastlingMode::Standard)
            .expect("invalid position");
        GameSession::from_position(1, position, Color::White)
    }

    fn play(session: &mut GameSession, moves: &str) {
        for uci in moves.split_whitespace() {
            let mv = uci
                .parse::<UciMove>()
                .expect("invalid UCI")
                .to_move(session.position())
                .expect("illegal move in test");
            session.apply(mv).expect("legal move");
        }
    }

    #[test]
    fn new_session_starts_from_initial_position() {
        let session = GameSession::new(7, Color::Black);
        assert_eq!(session.id(), 7);
        assert_eq!(session.fen(), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        assert!(!session.is_human_turn());
        assert_eq!(session.outcome(), None);
    }

    #[test]
    fn applying_move_advances_ply_and_turn() {
        let mut session = GameSession::new(1, Color::White);
        play(&mut session, "e2e4");

        assert_eq!(session.ply(), 1);
        assert_eq!(session.turn(), Color::Black);
        assert!(session.fen().starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"));
    }

    #[test]
    fn illegal_move_is_rejected_without_change() {
        let mut session = GameSession::new(1, Color::White);
        let other = session_from("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1");
        let black_move = other.legal_moves()[0];

        let err = session.apply(black_move).expect_err("not white's move");
        assert!(err.fen.starts_with("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP"));
        assert_eq!(session.ply(), 0);
    }

    #[test]
    fn fools_mate_is_black_win() {
        let mut session = GameSession::new(1, Color::White);
        play(&mut session, "f2f3 e7e5 g2g4 d8h4");

        let outcome = session.outcome().expect("game over");
        assert_eq!(outcome.winner(), Some(Color::Black));
        assert_eq!(outcome.to_string(), "Black wins (checkmate)");
    }

    #[test_case("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", GameOutcome::Stalemate, "Draw (stalemate)")]
    #[test_case("8/8/4k3/8/8/4K3/8/8 w - - 0 1", GameOutcome::InsufficientMaterial, "Draw (insufficient material)")]
    #[test_case("8/8/4k3/8/8/4K3/8/R7 w - - 150 100", GameOutcome::SeventyFiveMoveRule, "Draw (seventy-five-move rule)")]
    fn drawn_positions(fen: &str, expected: GameOutcome, text: &str) {
        let outcome = session_from(fen).outcome();
        assert_eq!(outcome, Some(expected));
        assert_eq!(expected.to_string(), text);
    }

    #[test]
    fn fivefold_repetition_ends_game() {
        let mut session = GameSession::new(1, Color::White);
        let shuffle = "g1f3 g8f6 f3g1 f6g8";
        for _ in 0..3 {
            play(&mut session, shuffle);
        }
        assert_eq!(session.repetitions(), 4);
        assert_eq!(session.outcome(), None);

        play(&mut session, shuffle);
        assert_eq!(session.outcome(), Some(GameOutcome::FivefoldRepetition));
    }

    #[test]
    fn check_info_names_king_and_checker() {
        let mut session = GameSession::new(1, Color::White);
        play(&mut session, "e2e4 f7f6 d1h5");

        let check = session.check_info().expect("black is in check");
        assert_eq!(check.king_square, Square::E8);
        assert!(check.checkers.contains(Square::H5));
    }
}
