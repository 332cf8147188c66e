//! Move recommendations from an external UCI engine.
//!
//! The engine runs on its own worker thread behind an [`EngineDispatcher`] so
//! a slow search never stalls the frame loop. Every request carries a
//! [`Ticket`]; the game machine drops replies whose ticket no longer matches
//! the current position.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, trace, warn};
use shakmaty::uci::UciMove;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("engine closed its output")]
    Closed,
    #[error("engine has no move in this position")]
    NoMove,
    #[error("engine sent unparsable move '{0}'")]
    BadMove(String),
    #[error("engine worker has stopped")]
    Disconnected,
    #[error("engine did not answer '{0}' in time")]
    Timeout(String),
}

/// Time allowed for `uciok` and `readyok`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the engine may take to exit after `quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// How long dropping a dispatcher waits for its worker to finish.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// Time allowed for `go depth <depth>` to produce a `bestmove`.
pub fn search_timeout(depth: u32) -> Duration {
    Duration::from_secs(5) + Duration::from_secs(2) * depth
}

/// Source of best-move suggestions.
pub trait MoveRecommender {
    /// Best move for the position in `fen`, searching to `depth` plies.
    fn best_move(&mut self, fen: &str, depth: u32) -> Result<UciMove, EngineError>;

    /// Forget state from a previous game.
    fn new_game(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Identifies the position a recommendation was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub session: u64,
    pub ply: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub ticket: Ticket,
    pub fen: String,
    pub depth: u32,
}

#[derive(Debug)]
pub struct EngineReply {
    pub ticket: Ticket,
    pub result: Result<UciMove, EngineError>,
}

/// A UCI engine subprocess, e.g. Stockfish.
///
/// Output is read on a separate thread so every wait has a deadline. An
/// engine that misses one is killed.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

impl UciEngine {
    /// Start the engine at `path` and complete the UCI handshake.
    pub fn spawn(path: &Path) -> Result<Self, EngineError> {
        Self::from_command(Command::new(path))
    }

    /// Start an engine from a prepared command (extra arguments, environment).
    pub fn from_command(mut command: Command) -> Result<Self, EngineError> {
        let path = PathBuf::from(command.get_program());
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn { path, source })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            // Both are piped above; treat a missing handle as a dead process.
            let _ = child.kill();
            return Err(EngineError::Closed);
        };
        let lines = match spawn_reader(stdout) {
            Ok(lines) => lines,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };
        let mut engine = Self { child, stdin, lines };

        engine.send("uci")?;
        engine.wait_for("uciok", HANDSHAKE_TIMEOUT)?;
        engine.new_game()?;
        Ok(engine)
    }

    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        trace!("engine << {command}");
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Read lines until one starts with `token`, returning that line.
    fn wait_for(&mut self, token: &str, timeout: Duration) -> Result<String, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.lines.recv_deadline(deadline) {
                Ok(line) => {
                    trace!("engine >> {line}");
                    if line.split_whitespace().next() == Some(token) {
                        return Ok(line);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Closed),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("engine missed '{token}' after {timeout:?}, killing it");
                    let _ = self.child.kill();
                    return Err(EngineError::Timeout(token.to_string()));
                }
            }
        }
    }
}

/// Forward trimmed stdout lines until the engine closes its output.
fn spawn_reader(stdout: ChildStdout) -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new().name("engine-stdout".into()).spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

impl MoveRecommender for UciEngine {
    fn best_move(&mut self, fen: &str, depth: u32) -> Result<UciMove, EngineError> {
        self.send(&format!("position fen {fen}"))?;
        self.send(&format!("go depth {depth}"))?;
        let line = self.wait_for("bestmove", search_timeout(depth))?;
        parse_bestmove(&line)
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.send("ucinewgame")?;
        self.send("isready")?;
        self.wait_for("readyok", HANDSHAKE_TIMEOUT)?;
        Ok(())
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        if self.send("quit").is_ok() {
            let deadline = Instant::now() + QUIT_GRACE;
            while Instant::now() < deadline {
                if let Ok(Some(_)) = self.child.try_wait() {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Parse `bestmove <move> [ponder <move>]`.
pub fn parse_bestmove(line: &str) -> Result<UciMove, EngineError> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return Err(EngineError::BadMove(line.to_string()));
    }
    match tokens.next() {
        None | Some("(none)") => Err(EngineError::NoMove),
        Some(text) => match text.parse::<UciMove>() {
            Ok(UciMove::Null) => Err(EngineError::NoMove),
            Ok(mv) => Ok(mv),
            Err(_) => Err(EngineError::BadMove(text.to_string())),
        },
    }
}

/// Runs a [`MoveRecommender`] on a worker thread.
///
/// Requests are served in order. Replies are collected without blocking via
/// [`try_recv`](Self::try_recv).
pub struct EngineDispatcher {
    requests: Option<Sender<EngineRequest>>,
    replies: Receiver<EngineReply>,
    worker: Option<JoinHandle<()>>,
    /// Disconnects when the worker returns.
    finished: Receiver<()>,
}

impl EngineDispatcher {
    pub fn spawn<R>(recommender: R) -> Result<Self, EngineError>
    where
        R: MoveRecommender + Send + 'static,
    {
        let (request_tx, request_rx) = unbounded::<EngineRequest>();
        let (reply_tx, reply_rx) = unbounded::<EngineReply>();
        let (finished_tx, finished_rx) = unbounded::<()>();

        let worker = thread::Builder::new().name("engine".into()).spawn(move || {
            let _finished = finished_tx;
            serve(recommender, request_rx, reply_tx);
        })?;

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
            finished: finished_rx,
        })
    }

    pub fn submit(&self, request: EngineRequest) -> Result<(), EngineError> {
        debug!(
            "engine request {:?} at depth {}: {}",
            request.ticket, request.depth, request.fen
        );
        self.requests
            .as_ref()
            .ok_or(EngineError::Disconnected)?
            .send(request)
            .map_err(|_| EngineError::Disconnected)
    }

    /// Next finished reply, if any.
    #[inline]
    pub fn try_recv(&self) -> Option<EngineReply> {
        self.replies.try_recv().ok()
    }

    /// Wait up to `timeout` for the next reply.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineReply> {
        self.replies.recv_timeout(timeout).ok()
    }
}

impl Drop for EngineDispatcher {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop once the current
        // search returns.
        self.requests.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        match self.finished.recv_timeout(SHUTDOWN_WAIT) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("engine worker still busy after {SHUTDOWN_WAIT:?}, detaching it");
            }
            _ => {
                if worker.join().is_err() {
                    warn!("engine worker panicked");
                }
            }
        }
    }
}

fn serve<R: MoveRecommender>(
    mut recommender: R,
    requests: Receiver<EngineRequest>,
    replies: Sender<EngineReply>,
) {
    let mut session = None;
    for request in requests {
        if session.is_some_and(|s| s != request.ticket.session) {
            if let Err(err) = recommender.new_game() {
                warn!("engine failed to reset for new game: {err}");
            }
        }
        session = Some(request.ticket.session);

        let result = recommender.best_move(&request.fen, request.depth);
        let reply = EngineReply {
            ticket: request.ticket,
            result,
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    debug!("engine worker exiting");
}
