//! Stand-ins for the camera and the engine, plus a terminal board view, for
//! development without a camera rig.

mod display;
mod recommender;
mod script;
mod synthetic;
mod terminal;

pub use display::{DisplayError, TerminalDisplay};
pub use recommender::{RecommenderLog, ScriptedRecommender};
pub use script::{ParseError, ScriptedBoard};
pub use synthetic::SyntheticBoard;
pub use terminal::{Reply, Simulator, run_interactive_terminal};
