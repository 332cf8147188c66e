use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shakmaty::{CastlingMode, Chess, Position, fen::Fen, uci::UciMove};

use crate::engine::{EngineError, MoveRecommender};

#[derive(Debug, Clone)]
enum Replies {
    Scripted(VecDeque<String>),
    FirstLegal,
    Failing,
}

/// Stand-in for a UCI engine.
///
/// Replies come from a fixed list, from the first legal move of the
/// requested position, or always fail.
#[derive(Debug, Clone)]
pub struct ScriptedRecommender {
    replies: Replies,
    log: RecommenderLog,
}

impl ScriptedRecommender {
    /// Reply with `moves` (UCI notation) in order, then report no move.
    pub fn new<'a>(moves: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_replies(Replies::Scripted(moves.into_iter().map(String::from).collect()))
    }

    /// Reply with the first legal move of whatever position is asked about.
    pub fn first_legal() -> Self {
        Self::with_replies(Replies::FirstLegal)
    }

    /// Fail every request, as an engine that died mid-game would.
    pub fn failing() -> Self {
        Self::with_replies(Replies::Failing)
    }

    fn with_replies(replies: Replies) -> Self {
        Self {
            replies,
            log: RecommenderLog::default(),
        }
    }

    /// Shared record of the calls made, readable after the recommender has
    /// moved to a worker thread.
    pub fn log(&self) -> RecommenderLog {
        self.log.clone()
    }
}

impl MoveRecommender for ScriptedRecommender {
    fn best_move(&mut self, fen: &str, depth: u32) -> Result<UciMove, EngineError> {
        self.log.lock().requests.push((fen.to_string(), depth));

        match &mut self.replies {
            Replies::Scripted(moves) => {
                let text = moves.pop_front().ok_or(EngineError::NoMove)?;
                text.parse().map_err(|_| EngineError::BadMove(text))
            }
            Replies::FirstLegal => {
                let position: Chess = fen
                    .parse::<Fen>()
                    .map_err(|_| EngineError::BadMove(fen.to_string()))?
                    .into_position(CastlingMode::Standard)
                    .map_err(|_| EngineError::BadMove(fen.to_string()))?;
                let mv = position.legal_moves().first().copied().ok_or(EngineError::NoMove)?;
                Ok(mv.to_uci(CastlingMode::Standard))
            }
            Replies::Failing => Err(EngineError::Closed),
        }
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.log.lock().new_games += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogEntries {
    requests: Vec<(String, u32)>,
    new_games: u32,
}

/// Calls received by a [`ScriptedRecommender`].
#[derive(Debug, Clone, Default)]
pub struct RecommenderLog(Arc<Mutex<LogEntries>>);

impl RecommenderLog {
    fn lock(&self) -> MutexGuard<'_, LogEntries> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `(fen, depth)` of every request, oldest first.
    pub fn requests(&self) -> Vec<(String, u32)> {
        self.lock().requests.clone()
    }

    pub fn new_games(&self) -> u32 {
        self.lock().new_games
    }
}
