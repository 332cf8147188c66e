//! The per-frame loop: camera frame in, game events and board feedback out.
//!
//! [`FramePipeline`] is the single owner of the corner memory, the empty-board
//! reference and the [`GameMachine`]. Other threads talk to it through a
//! [`ControlHandle`]; their requests are applied at the start of the next
//! frame.

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use image::RgbImage;
use log::{debug, info, warn};

use crate::FrameSource;
use crate::config::{Config, SensorMode};
use crate::engine::EngineDispatcher;
use crate::feedback::{BoardFeedback, compute_feedback};
use crate::game_logic::{FrameReading, GameEvent, GameMachine, Intent};
use crate::geometry::Quad;
use crate::vision::{BoardLocalizer, BoardSmoother, OccupancySensor, preprocess, warp_board};

/// Requests accepted by a running pipeline.
#[derive(Debug, Clone)]
pub enum Control {
    /// Use these corners instead of detecting the board.
    SetCorners(Quad),
    /// Go back to automatic board detection.
    ClearCorners,
    /// Store the next top-down image as the empty-board reference.
    CaptureReference,
    ClearReference,
    Game(Intent),
}

/// Cloneable sender of [`Control`] requests.
#[derive(Debug, Clone)]
pub struct ControlHandle(Sender<Control>);

impl ControlHandle {
    /// Returns `false` once the pipeline is gone.
    pub fn send(&self, control: Control) -> bool {
        self.0.send(control).is_ok()
    }

    #[inline]
    pub fn game(&self, intent: Intent) -> bool {
        self.send(Control::Game(intent))
    }
}

/// Everything that happened while processing one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// Corners used for this frame, if the board was found.
    pub corners: Option<Quad>,
    pub manual_corners: bool,
    pub reading: Option<FrameReading>,
    pub events: Vec<GameEvent>,
    pub feedback: BoardFeedback,
}

pub struct FramePipeline {
    config: Config,
    localizer: BoardLocalizer,
    smoother: BoardSmoother,
    sensor: OccupancySensor,
    manual_corners: Option<Quad>,
    reference: Option<RgbImage>,
    capture_pending: bool,
    calibrated: bool,
    machine: GameMachine,
    engine: Option<EngineDispatcher>,
    controls: Receiver<Control>,
    handle: ControlHandle,
}

impl FramePipeline {
    pub fn new(config: Config) -> Self {
        let (sender, controls) = unbounded();
        Self {
            localizer: BoardLocalizer::new(&config.localizer),
            smoother: BoardSmoother::new(&config.localizer),
            sensor: OccupancySensor::new(&config.sensor),
            machine: GameMachine::new(&config.game, &config.engine),
            manual_corners: None,
            reference: None,
            capture_pending: false,
            calibrated: false,
            engine: None,
            controls,
            handle: ControlHandle(sender),
            config,
        }
    }

    /// Send engine requests to `engine`. Without one the game runs with no
    /// recommendations.
    pub fn with_engine(mut self, engine: EngineDispatcher) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn control(&self) -> ControlHandle {
        self.handle.clone()
    }

    #[inline]
    pub fn machine(&self) -> &GameMachine {
        &self.machine
    }

    #[inline]
    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Run one frame through localization, warping, sensing and the game.
    pub fn process(&mut self, frame: &RgbImage, now: Instant) -> FrameReport {
        self.apply_controls();

        let corners = match self.manual_corners {
            Some(quad) => Some(quad),
            None => {
                let l = &self.config.localizer;
                let edges = preprocess(frame, l.canny_low, l.canny_high);
                self.smoother.smooth(self.localizer.locate(&edges))
            }
        };
        let top_down = corners.and_then(|quad| {
            let warped = warp_board(frame, &quad, self.config.localizer.warp_size);
            if warped.is_none() {
                debug!("corners {:?} do not span a board", quad.corners());
            }
            warped
        });

        if let Some(board) = top_down.as_ref().filter(|_| self.capture_pending) {
            info!("captured empty-board reference");
            self.reference = Some(board.clone());
            self.capture_pending = false;
        }

        let reading = top_down.as_ref().and_then(|board| self.read(board));
        self.set_calibrated(reading.is_some());

        let mut events = self.machine.update(reading.as_ref(), now);
        self.dispatch(&events);
        events.extend(self.collect_recommendations());

        FrameReport {
            corners,
            manual_corners: self.manual_corners.is_some(),
            reading,
            feedback: compute_feedback(&self.machine.snapshot()),
            events,
        }
    }

    /// Advance the game without a frame, e.g. after a camera read failure.
    pub fn skip(&mut self, now: Instant) -> FrameReport {
        self.apply_controls();
        let mut events = self.machine.update(None, now);
        self.dispatch(&events);
        events.extend(self.collect_recommendations());
        FrameReport {
            manual_corners: self.manual_corners.is_some(),
            feedback: compute_feedback(&self.machine.snapshot()),
            events,
            ..FrameReport::default()
        }
    }

    /// Process frames from `source` until it runs dry, handing each report to
    /// `on_report`. Read failures skip the frame. Returns the number of
    /// frames processed.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_report: F) -> usize
    where
        S: FrameSource,
        F: FnMut(&FrameReport),
    {
        let mut processed = 0;
        loop {
            let report = match source.read_frame() {
                Ok(Some(frame)) => {
                    processed += 1;
                    self.process(&frame, Instant::now())
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("skipping frame: {err}");
                    self.skip(Instant::now())
                }
            };
            on_report(&report);
        }
        processed
    }

    fn apply_controls(&mut self) {
        while let Ok(control) = self.controls.try_recv() {
            match control {
                Control::SetCorners(quad) => {
                    info!("using manual corners {:?}", quad.corners());
                    self.manual_corners = Some(quad);
                }
                Control::ClearCorners => {
                    info!("back to automatic board detection");
                    self.manual_corners = None;
                    self.smoother.reset();
                }
                Control::CaptureReference => self.capture_pending = true,
                Control::ClearReference => {
                    self.reference = None;
                    self.capture_pending = false;
                }
                Control::Game(intent) => self.machine.enqueue(intent),
            }
        }
    }

    fn read(&self, board: &RgbImage) -> Option<FrameReading> {
        let occupancy = match (self.config.sensor.mode, &self.reference) {
            (SensorMode::Auto, _) => self.sensor.scan(board),
            (SensorMode::Reference, Some(reference)) => self.sensor.scan_diff(board, reference),
            (SensorMode::Reference, None) => return None,
        };
        Some(FrameReading::new(occupancy).with_brightness(self.sensor.brightness(board)))
    }

    fn set_calibrated(&mut self, calibrated: bool) {
        if calibrated != self.calibrated {
            self.calibrated = calibrated;
            self.machine.enqueue(Intent::Calibrated(calibrated));
        }
    }

    fn dispatch(&self, events: &[GameEvent]) {
        for event in events {
            let GameEvent::EngineRequested(request) = event else {
                continue;
            };
            match &self.engine {
                Some(engine) => {
                    if let Err(err) = engine.submit(request.clone()) {
                        warn!("no recommendation for this move: {err}");
                    }
                }
                None => debug!("no engine, skipping request {:?}", request.ticket),
            }
        }
    }

    fn collect_recommendations(&mut self) -> Vec<GameEvent> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };
        let mut events = Vec::new();
        while let Some(reply) = engine.try_recv() {
            match reply.result {
                Ok(best) => events.extend(self.machine.accept_recommendation(reply.ticket, &best)),
                Err(err) => warn!("engine gave no recommendation: {err}"),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::Status;
    use crate::mock::SyntheticBoard;
    use crate::occupancy::OccupancyGrid;
    use shakmaty::{Chess, Color, Position};
    use std::time::Duration;

    fn start_position() -> OccupancyGrid {
        OccupancyGrid::from(Chess::default().board().occupied())
    }

    #[test]
    fn manual_corners_skip_detection() {
        let board = SyntheticBoard::new(&Chess::default());
        let mut pipeline = FramePipeline::new(Config::default());
        pipeline.control().send(Control::SetCorners(board.corners()));

        let report = pipeline.process(&board.render(), Instant::now());
        assert!(report.manual_corners);
        assert_eq!(report.corners, Some(board.corners()));
        assert_eq!(report.reading.map(|r| r.occupancy), Some(start_position()));
    }

    #[test]
    fn blank_frame_is_not_calibrated() {
        let mut pipeline = FramePipeline::new(Config::default());
        pipeline.control().game(Intent::StartGame { human: Color::White });

        let report = pipeline.process(&RgbImage::new(320, 240), Instant::now());
        assert_eq!(report.corners, None);
        assert_eq!(report.events, vec![GameEvent::AwaitingCalibration]);
        assert_eq!(pipeline.machine().status(), Status::AwaitingCalibration);
    }

    #[test]
    fn reference_mode_waits_for_capture() {
        let mut config = Config::default();
        config.sensor.mode = SensorMode::Reference;
        let mut board = SyntheticBoard::new(&Chess::default());
        let mut pipeline = FramePipeline::new(config);
        let control = pipeline.control();
        control.send(Control::SetCorners(board.corners()));

        let empty = board.render_empty();
        assert!(pipeline.process(&empty, Instant::now()).reading.is_none());

        control.send(Control::CaptureReference);
        let report = pipeline.process(&empty, Instant::now());
        assert!(pipeline.has_reference());
        assert_eq!(report.reading.map(|r| r.occupancy), Some(OccupancyGrid::EMPTY));

        board.set_position(&Chess::default());
        let report = pipeline.process(&board.render(), Instant::now());
        assert_eq!(report.reading.map(|r| r.occupancy), Some(start_position()));
    }

    #[test]
    fn skipped_frames_still_advance_game() {
        let mut pipeline = FramePipeline::new(Config::default());
        pipeline.control().game(Intent::Stop);
        let report = pipeline.skip(Instant::now() + Duration::from_millis(100));
        assert!(report.events.is_empty());
        assert_eq!(report.corners, None);
    }
}
