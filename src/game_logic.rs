//! Turns per-frame occupancy readings into validated chess moves.
//!
//! [`GameMachine`] owns the authoritative position. Every frame it compares
//! the observed occupancy with the position; a difference has to hold still
//! for `stability_threshold` frames and then the settle delay before a move
//! is inferred, so hands moving over the board never produce moves.

mod inference;
mod session;

pub use inference::{NoMatch, format_squares, infer, occupancy_after};
pub use session::{GameOutcome, GameSession, IllegalMove};

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use shakmaty::{Bitboard, CastlingMode, Chess, Color, Move, Position, Square, uci::UciMove};

use crate::config::{EngineConfig, GameConfig, depth_for_difficulty};
use crate::engine::{EngineRequest, Ticket};
use crate::feedback::{CheckInfo, FeedbackSource};
use crate::occupancy::{OccupancyGrid, SquareBrightness};

/// What the vision side saw in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReading {
    pub occupancy: OccupancyGrid,
    /// Per-square brightness, used to break ties between capture candidates.
    pub brightness: Option<SquareBrightness>,
}

impl FrameReading {
    #[inline]
    pub fn new(occupancy: OccupancyGrid) -> Self {
        Self {
            occupancy,
            brightness: None,
        }
    }

    #[inline]
    pub fn with_brightness(mut self, brightness: SquareBrightness) -> Self {
        self.brightness = Some(brightness);
        self
    }
}

impl From<OccupancyGrid> for FrameReading {
    fn from(occupancy: OccupancyGrid) -> Self {
        Self::new(occupancy)
    }
}

/// Requests from outside the frame loop, applied at the start of the next update.
#[derive(Debug, Clone)]
pub enum Intent {
    /// Start a game from the initial position, replacing any game in progress.
    StartGame { human: Color },
    /// Start a game from an arbitrary position.
    StartFromPosition { human: Color, position: Box<Chess> },
    /// Restart from the initial position with the same sides.
    NewGame,
    /// Whether the vision side can currently produce occupancy readings.
    Calibrated(bool),
    /// Engine strength 1-10.
    SetDifficulty(u8),
    /// Abandon the game and go idle.
    Stop,
}

/// Observable consequences of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    GameStarted { session: u64, human: Color, fen: String },
    /// A game was requested but the board is not calibrated yet.
    AwaitingCalibration,
    /// A stable board change is waiting out the settle delay.
    Settling { squares: Vec<Square> },
    MoveApplied { mv: Move, uci: String, fen: String },
    /// No legal move explains the board; the listed squares differ.
    InvalidBoard { squares: Vec<Square> },
    /// The board matches the position again after being flagged invalid.
    BoardCorrected,
    GameOver(GameOutcome),
    /// The engine side is to move; forward to the engine worker.
    EngineRequested(EngineRequest),
    Recommendation { mv: Move, uci: String },
    Stopped,
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameStarted { session, human, fen } => {
                write!(f, "game {session} started, human plays {human:?}: {fen}")
            }
            Self::AwaitingCalibration => f.write_str("waiting for board calibration"),
            Self::Settling { squares } => write!(f, "settling ({})", format_squares(squares)),
            Self::MoveApplied { uci, fen, .. } => write!(f, "played {uci}: {fen}"),
            Self::InvalidBoard { squares } => write!(f, "invalid board, check {}", format_squares(squares)),
            Self::BoardCorrected => f.write_str("board corrected"),
            Self::GameOver(outcome) => write!(f, "game over: {outcome}"),
            Self::EngineRequested(request) => write!(f, "asking engine at depth {}", request.depth),
            Self::Recommendation { uci, .. } => write!(f, "engine suggests {uci}"),
            Self::Stopped => f.write_str("game stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Idle,
    AwaitingCalibration,
    Playing,
    GameOver,
}

/// A board change that has been seen in consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDiff {
    pub grid: OccupancyGrid,
    pub count: u32,
    pub first_seen: Instant,
}

/// Progress of a board change towards being accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    /// Board matches the position.
    Stable,
    Pending(PendingDiff),
    /// Stable long enough; inferred once the settle delay has passed.
    Settling { grid: OccupancyGrid, since: Instant },
}

#[derive(Debug, Clone)]
struct GameSetup {
    human: Color,
    position: Chess,
}

#[derive(Debug, Clone)]
struct Playing {
    session: GameSession,
    debounce: Debounce,
    invalid: Option<Vec<Square>>,
    recommendation: Option<Move>,
    observed: Option<OccupancyGrid>,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    AwaitingCalibration(GameSetup),
    Playing(Box<Playing>),
    GameOver {
        session: GameSession,
        outcome: GameOutcome,
    },
}

#[derive(Debug, Clone, Copy)]
struct Rules {
    stability_threshold: u32,
    settle_delay: Duration,
    depth: u32,
}

/// Single owner of the game: consumes intents and frame readings, emits events.
#[derive(Debug, Clone)]
pub struct GameMachine {
    rules: Rules,
    default_human: Color,
    calibrated: bool,
    next_session: u64,
    intents: VecDeque<Intent>,
    phase: Phase,
}

impl GameMachine {
    pub fn new(game: &GameConfig, engine: &EngineConfig) -> Self {
        Self {
            rules: Rules {
                stability_threshold: game.stability_threshold.max(1),
                settle_delay: game.settle_delay(),
                depth: engine.depth(),
            },
            default_human: game.human.into(),
            calibrated: false,
            next_session: 0,
            intents: VecDeque::new(),
            phase: Phase::Idle,
        }
    }

    /// Queue a request; it takes effect at the next [`update`](Self::update).
    pub fn enqueue(&mut self, intent: Intent) {
        self.intents.push_back(intent);
    }

    /// Advance one frame.
    ///
    /// `reading` is `None` when the board could not be read this frame; the
    /// debounce state is then left untouched.
    pub fn update(&mut self, reading: Option<&FrameReading>, now: Instant) -> Vec<GameEvent> {
        let mut events = Vec::new();
        while let Some(intent) = self.intents.pop_front() {
            self.apply_intent(intent, &mut events);
        }

        let rules = self.rules;
        let finished = match (&mut self.phase, reading) {
            (Phase::Playing(playing), Some(reading)) => playing.observe(reading, now, &rules, &mut events),
            _ => None,
        };
        if let Some(outcome) = finished {
            self.finish(outcome);
        }
        events
    }

    /// Accept an engine suggestion if it still belongs to the current position.
    pub fn accept_recommendation(&mut self, ticket: Ticket, best: &UciMove) -> Option<GameEvent> {
        let Phase::Playing(playing) = &mut self.phase else {
            debug!("dropping recommendation {best} for {ticket:?}, no game in progress");
            return None;
        };
        let current = playing.ticket();
        if ticket != current {
            debug!("dropping stale recommendation {best} for {ticket:?}, now at {current:?}");
            return None;
        }

        match best.to_move(playing.session.position()) {
            Ok(mv) => {
                info!("engine recommends {best}");
                playing.recommendation = Some(mv);
                Some(GameEvent::Recommendation {
                    mv,
                    uci: best.to_string(),
                })
            }
            Err(_) => {
                warn!("engine suggested {best}, which is not legal in {}", playing.session.fen());
                None
            }
        }
    }

    pub fn status(&self) -> Status {
        match self.phase {
            Phase::Idle => Status::Idle,
            Phase::AwaitingCalibration(_) => Status::AwaitingCalibration,
            Phase::Playing(_) => Status::Playing,
            Phase::GameOver { .. } => Status::GameOver,
        }
    }

    /// Current or just-finished game.
    pub fn session(&self) -> Option<&GameSession> {
        match &self.phase {
            Phase::Playing(playing) => Some(&playing.session),
            Phase::GameOver { session, .. } => Some(session),
            Phase::Idle | Phase::AwaitingCalibration(_) => None,
        }
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        match &self.phase {
            Phase::GameOver { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    pub fn debounce(&self) -> Debounce {
        match &self.phase {
            Phase::Playing(playing) => playing.debounce,
            _ => Debounce::Stable,
        }
    }

    /// Squares flagged by the last failed inference, empty if the board is valid.
    pub fn invalid_squares(&self) -> &[Square] {
        match &self.phase {
            Phase::Playing(playing) => playing.invalid.as_deref().unwrap_or_default(),
            _ => &[],
        }
    }

    pub fn recommendation(&self) -> Option<Move> {
        match &self.phase {
            Phase::Playing(playing) => playing.recommendation,
            _ => None,
        }
    }

    #[inline]
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Search depth for engine requests.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.rules.depth
    }

    /// Everything a display needs, detached from the machine.
    pub fn snapshot(&self) -> GameSnapshot {
        let mut snapshot = GameSnapshot {
            status: self.status(),
            outcome: self.outcome(),
            ..GameSnapshot::default()
        };
        let Some(session) = self.session() else {
            return snapshot;
        };

        snapshot.fen = Some(session.fen());
        snapshot.human = Some(session.human());
        snapshot.turn = Some(session.turn());
        snapshot.expected = Some(session.expected_occupancy());
        snapshot.check = session.check_info();

        if let Phase::Playing(playing) = &self.phase {
            let position = session.position();
            snapshot.legal_moves = session.legal_moves().into_iter().collect();
            snapshot.invalid = playing.invalid.clone().unwrap_or_default();
            snapshot.recommendation = playing.recommendation;
            snapshot.observed = playing.observed;
            if let Some(observed) = playing.observed {
                let missing = !observed.bitboard();
                snapshot.lifted = (position.us() & missing).single_square();
                snapshot.captured = (position.them() & missing).single_square();
            }
        }
        snapshot
    }

    fn apply_intent(&mut self, intent: Intent, events: &mut Vec<GameEvent>) {
        match intent {
            Intent::StartGame { human } => self.start(
                GameSetup {
                    human,
                    position: Chess::default(),
                },
                events,
            ),
            Intent::StartFromPosition { human, position } => self.start(
                GameSetup {
                    human,
                    position: *position,
                },
                events,
            ),
            Intent::NewGame => {
                let human = match &self.phase {
                    Phase::AwaitingCalibration(setup) => setup.human,
                    _ => self.session().map_or(self.default_human, GameSession::human),
                };
                self.start(
                    GameSetup {
                        human,
                        position: Chess::default(),
                    },
                    events,
                );
            }
            Intent::Calibrated(calibrated) => {
                if calibrated != self.calibrated {
                    info!("board calibration {}", if calibrated { "ready" } else { "lost" });
                }
                self.calibrated = calibrated;
                if calibrated && matches!(self.phase, Phase::AwaitingCalibration(_)) {
                    if let Phase::AwaitingCalibration(setup) = std::mem::replace(&mut self.phase, Phase::Idle) {
                        self.begin(setup, events);
                    }
                }
            }
            Intent::SetDifficulty(difficulty) => {
                self.rules.depth = depth_for_difficulty(difficulty);
                info!("engine difficulty {difficulty}, depth {}", self.rules.depth);
            }
            Intent::Stop => {
                if !matches!(self.phase, Phase::Idle) {
                    info!("game stopped");
                    self.phase = Phase::Idle;
                    events.push(GameEvent::Stopped);
                }
            }
        }
    }

    fn start(&mut self, setup: GameSetup, events: &mut Vec<GameEvent>) {
        if self.calibrated {
            self.begin(setup, events);
        } else {
            info!("game requested, waiting for board calibration");
            self.phase = Phase::AwaitingCalibration(setup);
            events.push(GameEvent::AwaitingCalibration);
        }
    }

    fn begin(&mut self, setup: GameSetup, events: &mut Vec<GameEvent>) {
        self.next_session += 1;
        let session = GameSession::from_position(self.next_session, setup.position, setup.human);
        info!(
            "game {} started, human plays {:?}: {}",
            session.id(),
            session.human(),
            session.fen()
        );
        events.push(GameEvent::GameStarted {
            session: session.id(),
            human: session.human(),
            fen: session.fen(),
        });

        if let Some(outcome) = session.outcome() {
            info!("game over: {outcome}");
            events.push(GameEvent::GameOver(outcome));
            self.phase = Phase::GameOver { session, outcome };
            return;
        }
        if !session.is_human_turn() {
            events.push(GameEvent::EngineRequested(engine_request(&session, self.rules.depth)));
        }
        self.phase = Phase::Playing(Box::new(Playing {
            session,
            debounce: Debounce::Stable,
            invalid: None,
            recommendation: None,
            observed: None,
        }));
    }

    fn finish(&mut self, outcome: GameOutcome) {
        if let Phase::Playing(playing) = std::mem::replace(&mut self.phase, Phase::Idle) {
            self.phase = Phase::GameOver {
                session: playing.session,
                outcome,
            };
        }
    }
}

impl Playing {
    fn ticket(&self) -> Ticket {
        Ticket {
            session: self.session.id(),
            ply: self.session.ply(),
        }
    }

    /// Fold one reading into the debounce state; returns the outcome if the
    /// game ended.
    fn observe(
        &mut self,
        reading: &FrameReading,
        now: Instant,
        rules: &Rules,
        events: &mut Vec<GameEvent>,
    ) -> Option<GameOutcome> {
        let observed = reading.occupancy;
        self.observed = Some(observed);

        let expected = self.session.expected_occupancy();
        if observed == expected {
            if self.debounce != Debounce::Stable {
                debug!("board back to expected position");
            }
            self.debounce = Debounce::Stable;
            if self.invalid.take().is_some() {
                info!("board corrected");
                events.push(GameEvent::BoardCorrected);
            }
            return None;
        }

        let pending = match self.debounce {
            Debounce::Settling { grid, .. } if grid == observed => None,
            Debounce::Pending(pending) if pending.grid == observed => Some(PendingDiff {
                count: pending.count + 1,
                ..pending
            }),
            previous => {
                if matches!(previous, Debounce::Settling { .. }) {
                    debug!("board changed while settling, restarting");
                }
                Some(PendingDiff {
                    grid: observed,
                    count: 1,
                    first_seen: now,
                })
            }
        };
        if let Some(pending) = pending {
            self.debounce = if pending.count >= rules.stability_threshold {
                let squares = expected.diff(&pending.grid);
                debug!(
                    "change stable for {} frames ({}), settling",
                    pending.count,
                    format_squares(&squares)
                );
                events.push(GameEvent::Settling { squares });
                Debounce::Settling {
                    grid: pending.grid,
                    since: now,
                }
            } else {
                Debounce::Pending(pending)
            };
        }

        let Debounce::Settling { grid, since } = self.debounce else {
            return None;
        };
        if now.duration_since(since) < rules.settle_delay {
            return None;
        }
        self.debounce = Debounce::Stable;
        self.resolve(grid, reading.brightness.as_ref(), rules, events)
    }

    fn resolve(
        &mut self,
        grid: OccupancyGrid,
        hints: Option<&SquareBrightness>,
        rules: &Rules,
        events: &mut Vec<GameEvent>,
    ) -> Option<GameOutcome> {
        let mv = match infer(self.session.position(), grid, hints) {
            Ok(mv) => mv,
            Err(NoMatch { squares }) => {
                if self.invalid.is_none() {
                    warn!("invalid board, check {}", format_squares(&squares));
                } else {
                    debug!("board still invalid: {}", format_squares(&squares));
                }
                self.invalid = Some(squares.clone());
                events.push(GameEvent::InvalidBoard { squares });
                return None;
            }
        };

        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        if let Err(err) = self.session.apply(mv) {
            error!("discarding inferred move: {err}");
            return None;
        }
        let fen = self.session.fen();
        info!("move {uci} played, position {fen}");
        self.invalid = None;
        self.recommendation = None;
        events.push(GameEvent::MoveApplied { mv, uci, fen });

        if let Some(outcome) = self.session.outcome() {
            info!("game over: {outcome}");
            events.push(GameEvent::GameOver(outcome));
            return Some(outcome);
        }
        if !self.session.is_human_turn() {
            events.push(GameEvent::EngineRequested(engine_request(&self.session, rules.depth)));
        }
        None
    }
}

fn engine_request(session: &GameSession, depth: u32) -> EngineRequest {
    EngineRequest {
        ticket: Ticket {
            session: session.id(),
            ply: session.ply(),
        },
        fen: session.fen(),
        depth,
    }
}

/// Detached view of the game for displays and feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub status: Status,
    pub fen: Option<String>,
    pub human: Option<Color>,
    pub turn: Option<Color>,
    pub outcome: Option<GameOutcome>,
    pub expected: Option<OccupancyGrid>,
    pub observed: Option<OccupancyGrid>,
    legal_moves: Vec<Move>,
    lifted: Option<Square>,
    captured: Option<Square>,
    invalid: Vec<Square>,
    recommendation: Option<Move>,
    check: Option<CheckInfo>,
}

impl Default for GameSnapshot {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            fen: None,
            human: None,
            turn: None,
            outcome: None,
            expected: None,
            observed: None,
            legal_moves: Vec::new(),
            lifted: None,
            captured: None,
            invalid: Vec::new(),
            recommendation: None,
            check: None,
        }
    }
}

impl GameSnapshot {
    /// Squares where the camera disagrees with the position.
    pub fn mismatched(&self) -> Bitboard {
        match (self.expected, self.observed) {
            (Some(expected), Some(observed)) => expected.bitboard() ^ observed.bitboard(),
            _ => Bitboard::EMPTY,
        }
    }
}

impl FeedbackSource for GameSnapshot {
    fn legal_moves(&self) -> &[Move] {
        &self.legal_moves
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
