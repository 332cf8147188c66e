use std::time::{Duration, Instant};

use chessboard_vision::config::{EngineConfig, GameConfig, Side};
use chessboard_vision::feedback::{SquareFeedback, compute_feedback};
use chessboard_vision::game_logic::{FrameReading, GameEvent, GameMachine, GameOutcome, Intent, Status};
use chessboard_vision::mock::ScriptedBoard;
use chessboard_vision::occupancy::OccupancyGrid;
use shakmaty::{CastlingMode, Chess, Color, Position, Square, fen::Fen};
use test_case::test_case;

const FRAME: Duration = Duration::from_millis(100);

/// A game fed by a scripted board, one reading per simulated 100 ms frame.
struct Table {
    machine: GameMachine,
    board: ScriptedBoard,
    now: Instant,
    events: Vec<GameEvent>,
}

impl Table {
    fn new() -> Self {
        Self::with_position(Chess::default(), Color::White)
    }

    fn from_fen(fen: &str) -> Self {
        let position: Chess = fen
            .parse::<Fen>()
            .expect("valid FEN")
            .into_position(CastlingMode::Standard)
            .expect("valid position");
        let human = position.turn();
        Self::with_position(position, human)
    }

    fn with_position(position: Chess, human: Color) -> Self {
        let game = GameConfig {
            stability_threshold: 5,
            settle_delay_ms: 2000,
            human: Side::White,
        };
        let mut machine = GameMachine::new(&game, &EngineConfig::default());
        let board = ScriptedBoard::from_grid(OccupancyGrid::from(position.board().occupied()));
        machine.enqueue(Intent::Calibrated(true));
        machine.enqueue(Intent::StartFromPosition {
            human,
            position: Box::new(position),
        });
        let mut table = Self {
            machine,
            board,
            now: Instant::now(),
            events: Vec::new(),
        };
        table.hold(1);
        table.events.clear();
        table
    }

    fn hold(&mut self, frames: usize) {
        for _ in 0..frames {
            self.now += FRAME;
            let reading = FrameReading::new(self.board.grid());
            self.events.extend(self.machine.update(Some(&reading), self.now));
        }
    }

    /// Perform `script` one change at a time, pausing `pause` frames after
    /// each change, then keep the final board still until it settles.
    fn perform(&mut self, script: &str, pause: usize) {
        self.board.push_script(script).expect("valid script");
        while self.board.tick().is_some() {
            self.hold(pause);
        }
        self.hold(30);
    }

    fn applied(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                GameEvent::MoveApplied { uci, .. } => Some(uci.as_str()),
                _ => None,
            })
            .collect()
    }

    fn fen(&self) -> String {
        self.machine.session().expect("session").fen()
    }
}

#[test]
fn unchanged_board_for_ten_frames_does_nothing() {
    let mut table = Table::new();
    table.hold(10);
    assert!(table.events.is_empty());
}

#[test]
fn held_pawn_push_is_applied_once() {
    let mut table = Table::new();
    table.perform("e2e4.", 0);

    assert_eq!(table.applied(), vec!["e2e4"]);
    assert_eq!(table.fen(), "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1");
}

#[test]
fn unexplained_board_is_flagged_until_restored() {
    let mut table = Table::new();
    table.perform("e2e5.", 0);

    assert!(table.events.contains(&GameEvent::InvalidBoard {
        squares: vec![Square::E2, Square::E5]
    }));
    assert_eq!(table.fen(), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");

    table.events.clear();
    table.perform("e5e2.", 0);
    assert_eq!(table.events, vec![GameEvent::BoardCorrected]);
    assert_eq!(table.machine.status(), Status::Playing);
}

#[test]
fn piece_in_hand_shows_guidance_without_moving() {
    let mut table = Table::new();
    table.board.push_script("g1.").expect("valid script");
    table.board.tick();
    table.hold(3);

    let feedback = compute_feedback(&table.machine.snapshot());
    assert_eq!(feedback.get(Square::G1), Some(SquareFeedback::Origin));
    assert_eq!(feedback.get(Square::F3), Some(SquareFeedback::Destination));
    assert!(table.applied().is_empty());
}

#[test]
fn quick_intermediate_steps_are_ignored() {
    let mut table = Table::new();
    // Lift, hover and put down, each shorter than the stability window.
    table.perform("g1. f3.", 2);
    assert_eq!(table.applied(), vec!["g1f3"]);
    assert!(!table.events.iter().any(|e| matches!(e, GameEvent::InvalidBoard { .. })));
}

#[test_case("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1", "e1. h1. g1. f1.", "e1g1"; "white short castle")]
#[test_case("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1", "e1. a1. c1. d1.", "e1c1"; "white long castle")]
#[test_case("r3k2r/8/8/8/8/8/8/R3K2R b KQkq - 0 1", "e8g8 h8f8.", "e8g8"; "black short castle")]
#[test_case("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1", "d5. e5d6.", "e5d6"; "en passant")]
#[test_case("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1", "d5. e4d5.", "e4d5"; "pawn capture")]
fn multi_step_moves(fen: &str, script: &str, expected: &str) {
    let mut table = Table::from_fen(fen);
    table.perform(script, 2);
    assert_eq!(table.applied(), vec![expected]);
}

#[test]
fn promotion_becomes_queen() {
    let mut table = Table::from_fen("8/4P1k1/8/8/8/8/8/4K3 w - - 0 1");
    table.perform("e7e8.", 0);

    assert_eq!(table.applied(), vec!["e7e8q"]);
    assert!(table.fen().starts_with("4Q3/6k1/"));
}

#[test]
fn fools_mate_ends_game() {
    let mut table = Table::new();
    table.perform("f2f3.", 0);
    table.perform("e7e5.", 0);
    table.perform("g2g4.", 0);
    table.perform("d8h4.", 0);

    assert_eq!(table.applied(), vec!["f2f3", "e7e5", "g2g4", "d8h4"]);
    let outcome = table.machine.outcome().expect("game over");
    assert_eq!(outcome, GameOutcome::Checkmate { winner: Color::Black });
    assert_eq!(outcome.to_string(), "Black wins (checkmate)");
    assert_eq!(table.machine.status(), Status::GameOver);
}

#[test]
fn check_is_highlighted() {
    let mut table = Table::new();
    for step in ["e2e4.", "f7f6.", "d1h5."] {
        table.perform(step, 0);
    }

    let feedback = compute_feedback(&table.machine.snapshot());
    assert_eq!(feedback.get(Square::E8), Some(SquareFeedback::Check));
    assert_eq!(feedback.get(Square::H5), Some(SquareFeedback::Checker));
}

#[test]
fn engine_is_asked_after_each_human_move() {
    let mut table = Table::new();
    table.perform("e2e4.", 0);
    table.perform("e7e5.", 0);
    table.perform("g1f3.", 0);

    let plies: Vec<u32> = table
        .events
        .iter()
        .filter_map(|e| match e {
            GameEvent::EngineRequested(request) => Some(request.ticket.ply),
            _ => None,
        })
        .collect();
    assert_eq!(plies, vec![1, 3]);
}
