//! Tunable parameters for the vision pipeline and game loop.
//!
//! Every field has a default, so a config file only needs to name the values
//! it overrides:
//!
//! ```toml
//! [game]
//! human = "black"
//! settle_delay_ms = 1500
//!
//! [engine]
//! difficulty = 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use shakmaty::Color;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub localizer: LocalizerConfig,
    pub sensor: SensorConfig,
    pub game: GameConfig,
    pub engine: EngineConfig,
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let l = &self.localizer;
        if !(0.0..=1.0).contains(&l.alpha) || l.alpha == 0.0 {
            return invalid("localizer.alpha must be in (0, 1]");
        }
        if l.max_jump <= 0.0 || l.relax_factor < 1.0 {
            return invalid("localizer.max_jump must be positive and relax_factor at least 1");
        }
        if l.canny_low > l.canny_high {
            return invalid("localizer.canny_low must not exceed canny_high");
        }
        if l.warp_size < 80 || l.warp_size % 8 != 0 {
            return invalid("localizer.warp_size must be a multiple of 8 and at least 80");
        }
        if !(0.0..0.5).contains(&self.sensor.square_inset) {
            return invalid("sensor.square_inset must be in [0, 0.5)");
        }
        if self.sensor.clahe_tiles == 0 {
            return invalid("sensor.clahe_tiles must be positive");
        }
        if self.game.stability_threshold == 0 {
            return invalid("game.stability_threshold must be positive");
        }
        if !(1..=10).contains(&self.engine.difficulty) {
            return invalid("engine.difficulty must be between 1 and 10");
        }
        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Board detection and corner smoothing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalizerConfig {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum contour area as a fraction of the frame area.
    pub min_area_fraction: f64,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub approx_epsilon: f64,
    /// Maximum diagonal length difference relative to the longer diagonal.
    pub max_diagonal_skew: f64,
    /// Corner smoothing factor: 0.1 is very smooth, 0.9 very reactive.
    pub alpha: f64,
    /// Per-frame corner movement (pixels) beyond which a reading is ignored.
    pub max_jump: f64,
    pub relax_after: u32,
    pub relax_factor: f64,
    pub reset_after: u32,
    /// Side length of the warped top-down board image.
    pub warp_size: u32,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_area_fraction: 0.10,
            approx_epsilon: 0.02,
            max_diagonal_skew: 0.25,
            alpha: 0.3,
            max_jump: 50.0,
            relax_after: 15,
            relax_factor: 3.0,
            reset_after: 30,
            warp_size: 800,
        }
    }
}

/// How squares are classified as occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// Texture and edge statistics, no calibration image needed.
    #[default]
    Auto,
    /// Difference against a captured empty-board reference.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    pub mode: SensorMode,
    /// Fraction of a square cropped from each side before measuring.
    pub square_inset: f64,
    /// Grey-level change counted as a differing pixel.
    pub diff_threshold: u8,
    /// Percentage of differing pixels above which a square is occupied.
    pub diff_occupied_percent: f64,
    pub clahe_clip_limit: f64,
    pub clahe_tiles: u32,
    /// Sobel L1 magnitude counted as an edge pixel.
    pub edge_magnitude: f32,
    pub variance_high: f64,
    pub edge_high: f64,
    pub variance_joint: f64,
    pub edge_joint: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            mode: SensorMode::Auto,
            square_inset: 0.2,
            diff_threshold: 40,
            diff_occupied_percent: 8.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            edge_magnitude: 100.0,
            variance_high: 450.0,
            edge_high: 0.12,
            variance_joint: 180.0,
            edge_joint: 0.05,
        }
    }
}

/// Which side the human plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    White,
    Black,
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameConfig {
    /// Identical mismatching frames required before settling.
    pub stability_threshold: u32,
    pub settle_delay_ms: u64,
    pub human: Side,
}

impl GameConfig {
    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 5,
            settle_delay_ms: 2000,
            human: Side::White,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// UCI engine executable; looked up on `PATH` when not absolute.
    pub path: PathBuf,
    /// 1 (weakest) to 10.
    pub difficulty: u8,
}

impl EngineConfig {
    /// Search depth used for recommendations.
    #[inline]
    pub fn depth(&self) -> u32 {
        depth_for_difficulty(self.difficulty)
    }
}

/// Difficulty 1-10 maps to search depth 2-20; out-of-range values are clamped.
pub fn depth_for_difficulty(difficulty: u8) -> u32 {
    u32::from(difficulty.clamp(1, 10)) * 2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            difficulty: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = "".parse().expect("empty config is valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.game.settle_delay(), Duration::from_secs(2));
        assert_eq!(config.engine.depth(), 10);
    }

    #[test]
    fn partial_sections_override_only_named_values() {
        let config: Config = "[game]\nhuman = \"black\"\n\n[sensor]\nmode = \"reference\"\n"
            .parse()
            .expect("valid config");

        assert_eq!(config.game.human, Side::Black);
        assert_eq!(config.game.stability_threshold, 5);
        assert_eq!(config.sensor.mode, SensorMode::Reference);
        assert_eq!(config.localizer, LocalizerConfig::default());
    }

    #[test_case("[engine]\ndifficulty = 11\n"; "difficulty too high")]
    #[test_case("[localizer]\nalpha = 0.0\n"; "zero alpha")]
    #[test_case("[localizer]\nwarp_size = 801\n"; "warp size not divisible")]
    #[test_case("[game]\nstability_threshold = 0\n"; "zero stability")]
    fn out_of_range_values_are_rejected(text: &str) {
        assert!(matches!(text.parse::<Config>(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        assert!(matches!(
            "[game]\nstabilty = 3\n".parse::<Config>(),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test_case(1, 2)]
    #[test_case(5, 10)]
    #[test_case(10, 20)]
    #[test_case(0, 2; "clamped low")]
    #[test_case(42, 20; "clamped high")]
    fn difficulty_maps_to_depth(difficulty: u8, depth: u32) {
        assert_eq!(depth_for_difficulty(difficulty), depth);
    }
}
