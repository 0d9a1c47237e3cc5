//! Conversion settings and their on-disk settings file.
//!
//! The settings file is plain text, one `Key<TAB>=<TAB>value` per line:
//!
//! ```text
//! Image Scale	=	x1.0
//! Play Speed	=	x1.0
//! Frame Rate	=	10
//! Color Depth	=	8bit
//! Thread Count	=	1
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const KEY_SCALE: &str = "Image Scale";
const KEY_SPEED: &str = "Play Speed";
const KEY_FPS: &str = "Frame Rate";
const KEY_DEPTH: &str = "Color Depth";
const KEY_THREAD: &str = "Thread Count";

/// Upper bound on filter workers
pub const MAX_THREADS: usize = 64;

/// Conversion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Output width multiplier
    pub scale: f32,
    /// Playback speed multiplier
    pub speed: f32,
    /// Target output frame rate
    pub fps: u32,
    /// Colour depth in bits, 1..=8
    pub depth: u8,
    /// Filter worker count
    pub thread: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            speed: 1.0,
            fps: 10,
            depth: 8,
            thread: 1,
        }
    }
}

impl ConvertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigError::Invalid(format!("scale must be positive, got {}", self.scale)));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ConfigError::Invalid(format!("speed must be positive, got {}", self.speed)));
        }
        if self.fps == 0 {
            return Err(ConfigError::Invalid("frame rate must be at least 1".into()));
        }
        if !(1..=8).contains(&self.depth) {
            return Err(ConfigError::Invalid(format!(
                "colour depth must be within 1..=8, got {}",
                self.depth
            )));
        }
        if self.thread == 0 || self.thread > MAX_THREADS {
            return Err(ConfigError::Invalid(format!(
                "thread count must be within 1..={MAX_THREADS}, got {}",
                self.thread
            )));
        }
        Ok(())
    }

    /// Parse settings file contents. All five keys are required.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut scale = None;
        let mut speed = None;
        let mut fps = None;
        let mut depth = None;
        let mut thread = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigError::Parse(format!("line {}: expected `key = value`", lineno + 1))
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                KEY_SCALE => scale = Some(parse_value::<f32>(key, value.strip_prefix('x').unwrap_or(value))?),
                KEY_SPEED => speed = Some(parse_value::<f32>(key, value.strip_prefix('x').unwrap_or(value))?),
                KEY_FPS => fps = Some(parse_value::<u32>(key, value)?),
                KEY_DEPTH => depth = Some(parse_value::<u8>(key, value.strip_suffix("bit").unwrap_or(value).trim())?),
                KEY_THREAD => thread = Some(parse_value::<usize>(key, value)?),
                other => {
                    return Err(ConfigError::Parse(format!("line {}: unknown key `{other}`", lineno + 1)));
                }
            }
        }

        let missing = |key: &str| ConfigError::Parse(format!("missing `{key}`"));
        let config = Self {
            scale: scale.ok_or_else(|| missing(KEY_SCALE))?,
            speed: speed.ok_or_else(|| missing(KEY_SPEED))?,
            fps: fps.ok_or_else(|| missing(KEY_FPS))?,
            depth: depth.ok_or_else(|| missing(KEY_DEPTH))?,
            thread: thread.ok_or_else(|| missing(KEY_THREAD))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render in settings file format.
    pub fn to_settings_string(&self) -> String {
        format!(
            "{KEY_SCALE}\t=\tx{:?}\n{KEY_SPEED}\t=\tx{:?}\n{KEY_FPS}\t=\t{}\n{KEY_DEPTH}\t=\t{}bit\n{KEY_THREAD}\t=\t{}\n",
            self.scale, self.speed, self.fps, self.depth, self.thread
        )
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_settings_string()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read the settings file, or write the defaults to it when it does not
    /// exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let config = Self::parse(&text)?;
            tracing::debug!("Loaded settings from {:?}: {:?}", path, config);
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Wrote default settings to {:?}", path);
            Ok(config)
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("invalid value `{value}` for `{key}`")))
}
