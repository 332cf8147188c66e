use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use shakmaty::Color;

use chessboard_vision::config::{Config, SensorMode};
use chessboard_vision::engine::{EngineDispatcher, UciEngine};
use chessboard_vision::frames::{ImageSequence, load_rgb};
use chessboard_vision::game_logic::{GameEvent, Intent};
use chessboard_vision::geometry::{Point, Quad};
use chessboard_vision::mock::run_interactive_terminal;
use chessboard_vision::pipeline::{Control, FramePipeline};

#[derive(Debug, Parser)]
#[command(version, about = "Follow a chess game on a physical board through a camera")]
struct Cli {
    /// TOML config file; built-in defaults are used for anything it omits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run without move recommendations even if an engine is configured.
    #[arg(long, global = true)]
    no_engine: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the vision pipeline over a directory of PNG/JPEG frames.
    Replay {
        dir: PathBuf,
        /// Side the human plays.
        #[arg(long, value_enum, default_value_t = SideArg::White)]
        human: SideArg,
        /// Board corners as x,y pixel pairs; disables automatic detection.
        #[arg(long, num_args = 4, value_parser = parse_point)]
        corners: Option<Vec<Point>>,
        /// Empty-board image for reference mode.
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Interactive simulator: toggle squares instead of using a camera.
    Simulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SideArg {
    White,
    Black,
}

impl From<SideArg> for Color {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::White => Color::White,
            SideArg::Black => Color::Black,
        }
    }
}

fn parse_point(text: &str) -> Result<Point, String> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{text}'"))?;
    let coord = |s: &str| s.trim().parse::<i32>().map_err(|err| format!("bad coordinate '{s}': {err}"));
    Ok(Point::new(coord(x)?, coord(y)?))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    let engine = if cli.no_engine { None } else { start_engine(&config) };

    let result = match cli.command {
        Command::Replay {
            dir,
            human,
            corners,
            reference,
        } => replay(config, engine, &dir, human.into(), corners, reference.as_deref()),
        Command::Simulate => run_interactive_terminal(&config, engine).map_err(|err| err.to_string()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// The engine is optional: without one the game runs with no recommendations.
fn start_engine(config: &Config) -> Option<EngineDispatcher> {
    let started = UciEngine::spawn(&config.engine.path).and_then(EngineDispatcher::spawn);
    match started {
        Ok(dispatcher) => {
            info!("engine {} ready", config.engine.path.display());
            Some(dispatcher)
        }
        Err(err) => {
            warn!("running without recommendations: {err}");
            None
        }
    }
}

fn replay(
    mut config: Config,
    engine: Option<EngineDispatcher>,
    dir: &Path,
    human: Color,
    corners: Option<Vec<Point>>,
    reference: Option<&Path>,
) -> Result<(), String> {
    let mut frames = ImageSequence::open(dir).map_err(|err| err.to_string())?;
    if frames.is_empty() {
        return Err(format!("no PNG or JPEG frames in {}", dir.display()));
    }

    // The reference image is captured through the pipeline like a live frame.
    let reference = reference.map(load_rgb).transpose().map_err(|err| err.to_string())?;
    if reference.is_some() {
        config.sensor.mode = SensorMode::Reference;
    }

    let mut pipeline = FramePipeline::new(config);
    if let Some(engine) = engine {
        pipeline = pipeline.with_engine(engine);
    }
    let control = pipeline.control();
    if let Some(points) = corners {
        if let Ok(points) = <[Point; 4]>::try_from(points) {
            control.send(Control::SetCorners(Quad::from_corners(points)));
        }
    }
    if let Some(image) = &reference {
        control.send(Control::CaptureReference);
        pipeline.process(image, std::time::Instant::now());
    }
    control.game(Intent::StartGame { human });

    let processed = pipeline.run(&mut frames, |report| {
        for event in &report.events {
            match event {
                GameEvent::InvalidBoard { .. } => warn!("{event}"),
                GameEvent::Settling { .. } | GameEvent::EngineRequested(_) => log::debug!("{event}"),
                _ => info!("{event}"),
            }
        }
    });

    info!("processed {processed} frames");
    if let Some(session) = pipeline.machine().session() {
        info!("final position: {}", session.fen());
    }
    if let Some(outcome) = pipeline.machine().outcome() {
        info!("result: {outcome}");
    }
    Ok(())
}
