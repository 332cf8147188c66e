use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};

use log::warn;
use shakmaty::{CastlingMode, Chess, Color, Position, fen::Fen};

use super::display::render_feedback;
use super::script::ScriptedBoard;
use crate::config::Config;
use crate::engine::{EngineDispatcher, EngineRequest};
use crate::feedback::compute_feedback;
use crate::game_logic::{FrameReading, GameEvent, GameMachine, Intent};
use crate::occupancy::OccupancyGrid;

/// Simulated time between frames.
const FRAME: Duration = Duration::from_millis(100);

/// How long to wait for an engine reply before moving on.
const ENGINE_WAIT: Duration = Duration::from_secs(5);

const HELP: &str = "Commands: s <script> | w [frames] | white | black | new | load <fen> | d <1-10> | p | q";

/// Drives a [`GameMachine`] from a [`ScriptedBoard`] on a simulated clock.
///
/// Each scripted change is held still long enough to pass the debounce and
/// settle delay, so a script like `e2e4.` plays a move straight away.
pub struct Simulator {
    machine: GameMachine,
    board: ScriptedBoard,
    engine: Option<EngineDispatcher>,
    now: Instant,
    hold_frames: u32,
}

/// Outcome of one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Messages(Vec<String>),
    Quit,
}

impl Simulator {
    pub fn new(config: &Config, engine: Option<EngineDispatcher>) -> Self {
        let game = &config.game;
        let settle_frames = game.settle_delay().as_millis().div_ceil(FRAME.as_millis());
        let hold_frames = game.stability_threshold + u32::try_from(settle_frames).unwrap_or(u32::MAX) + 1;

        let mut machine = GameMachine::new(&config.game, &config.engine);
        // The scripted board needs no camera calibration.
        machine.enqueue(Intent::Calibrated(true));
        machine.enqueue(Intent::StartGame {
            human: game.human.into(),
        });
        let mut simulator = Self {
            machine,
            board: ScriptedBoard::new(),
            engine,
            now: Instant::now(),
            hold_frames,
        };
        simulator.step(1);
        simulator
    }

    #[inline]
    pub fn machine(&self) -> &GameMachine {
        &self.machine
    }

    #[inline]
    pub fn occupancy(&self) -> OccupancyGrid {
        self.board.grid()
    }

    /// Run one command line, returning what should be printed.
    pub fn execute(&mut self, line: &str) -> Reply {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let messages = match command {
            "" => Vec::new(),
            "s" => self.play_script(rest),
            "w" => match rest {
                "" => self.step(1),
                n => match n.parse() {
                    Ok(frames) => self.step(frames),
                    Err(_) => vec![format!("not a frame count: {n}")],
                },
            },
            "white" | "black" => {
                let human = if command == "white" { Color::White } else { Color::Black };
                self.board.load_grid(start_grid());
                self.machine.enqueue(Intent::StartGame { human });
                self.step(1)
            }
            "new" => {
                self.board.load_grid(start_grid());
                self.machine.enqueue(Intent::NewGame);
                self.step(1)
            }
            "load" => self.load(rest),
            "d" => match rest.parse::<u8>() {
                Ok(level) if (1..=10).contains(&level) => {
                    self.machine.enqueue(Intent::SetDifficulty(level));
                    self.step(1);
                    vec![format!("difficulty {level}, depth {}", self.machine.depth())]
                }
                _ => vec!["usage: d <1-10>".to_string()],
            },
            "p" => Vec::new(),
            "q" => return Reply::Quit,
            _ => vec![format!("unknown command '{command}'"), HELP.to_string()],
        };
        Reply::Messages(messages)
    }

    /// Text view of the current state: status line, feedback grid, FEN.
    pub fn render(&self) -> Result<String, io::Error> {
        let mut buf = Vec::new();
        let snapshot = self.machine.snapshot();
        writeln!(buf, "status: {:?}", snapshot.status)?;
        render_feedback(&mut buf, &compute_feedback(&snapshot), Some(self.board.grid()))
            .map_err(|err| io::Error::other(err.to_string()))?;
        if let Some(fen) = &snapshot.fen {
            writeln!(buf, "fen: {fen}")?;
        }
        if let Some(outcome) = snapshot.outcome {
            writeln!(buf, "result: {outcome}")?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn play_script(&mut self, script: &str) -> Vec<String> {
        if let Err(err) = self.board.push_script(script) {
            return vec![err.to_string()];
        }
        let mut messages = Vec::new();
        while self.board.tick().is_some() {
            messages.extend(self.step(self.hold_frames));
        }
        messages
    }

    fn load(&mut self, text: &str) -> Vec<String> {
        let position = if text == "startpos" {
            Ok(Chess::default())
        } else {
            text.parse::<Fen>()
                .map_err(|err| err.to_string())
                .and_then(|fen| fen.into_position(CastlingMode::Standard).map_err(|err| err.to_string()))
        };
        match position {
            Ok(position) => {
                self.board.load_grid(OccupancyGrid::from(position.board().occupied()));
                let human = self.machine.session().map_or(Color::White, |s| s.human());
                self.machine.enqueue(Intent::StartFromPosition {
                    human,
                    position: Box::new(position),
                });
                self.step(1)
            }
            Err(err) => vec![format!("invalid FEN: {err}")],
        }
    }

    /// Advance `frames` frames with the board held as it is.
    fn step(&mut self, frames: u32) -> Vec<String> {
        let mut messages = Vec::new();
        for _ in 0..frames {
            self.now += FRAME;
            let reading = FrameReading::new(self.board.grid());
            let events = self.machine.update(Some(&reading), self.now);
            for event in events {
                messages.push(event.to_string());
                if let GameEvent::EngineRequested(request) = event {
                    messages.extend(self.ask_engine(request));
                }
            }
        }
        messages
    }

    fn ask_engine(&mut self, request: EngineRequest) -> Vec<String> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };
        if let Err(err) = engine.submit(request) {
            warn!("engine unavailable: {err}");
            return vec![format!("engine unavailable: {err}")];
        }
        let Some(reply) = engine.recv_timeout(ENGINE_WAIT) else {
            return vec!["engine did not answer in time".to_string()];
        };
        match reply.result {
            Ok(best) => self
                .machine
                .accept_recommendation(reply.ticket, &best)
                .map(|event| vec![event.to_string()])
                .unwrap_or_default(),
            Err(err) => vec![format!("no recommendation: {err}")],
        }
    }
}

fn start_grid() -> OccupancyGrid {
    OccupancyGrid::from(Chess::default().board().occupied())
}

/// Clears the screen and moves cursor to top-left.
#[inline]
fn clear_screen() {
    print!("\x1B[2J\x1B[H");
}

/// Interactive simulator on stdin/stdout.
pub fn run_interactive_terminal(config: &Config, engine: Option<EngineDispatcher>) -> io::Result<()> {
    let mut simulator = Simulator::new(config, engine);
    let mut messages = vec![HELP.to_string()];
    let stdin = io::stdin();

    loop {
        clear_screen();
        println!("Chessboard vision simulator");
        println!();
        print!("{}", simulator.render()?);
        for message in &messages {
            println!("{message}");
        }
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            return Ok(());
        }
        match simulator.execute(&input) {
            Reply::Messages(reply) => messages = reply,
            Reply::Quit => return Ok(()),
        }
    }
}
