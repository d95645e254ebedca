//! Processor configuration.
//!
//! Handles loading, validating, and merging a `pixelworks.toml` file on top
//! of the stock defaults. Every key is optional; a file only needs the values
//! it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! default_backend = "native"                              # backend tried first
//! fallback_order = ["native", "vision", "canvas", "software"]
//!
//! [save]
//! format = "png"            # png, jpeg, webp, avif
//! quality = 0.9             # 0.0-1.0
//!
//! [vision]
//! # asset_dir = "detectors" # directory of <key>.toml detector assets
//! face_key = "face"
//! object_key = "object"
//! min_confidence = 0.5      # drop detections below this score
//! background_tolerance = 0.1 # colour distance treated as background (0.0-1.0)
//!
//! [filters]
//! default_intensity = 1.0   # intensity used when an operation gives none
//!
//! [processing]
//! max_threads = 4           # rayon workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Library, OutputFormat, SaveOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Backend the CLI and [`BackendSet`](crate::imaging::operations::BackendSet) try first.
    pub default_backend: Library,
    /// Order the remaining backends are tried in when one fails.
    pub fallback_order: Vec<Library>,
    pub save: SaveConfig,
    pub vision: VisionConfig,
    pub filters: FilterConfig,
    pub processing: ProcessingConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            default_backend: Library::Native,
            fallback_order: vec![Library::Native, Library::Vision, Library::Canvas, Library::Software],
            save: SaveConfig::default(),
            vision: VisionConfig::default(),
            filters: FilterConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{name} must be 0.0-1.0")))
            }
        };
        unit("save.quality", self.save.quality)?;
        unit("vision.min_confidence", self.vision.min_confidence)?;
        unit("vision.background_tolerance", self.vision.background_tolerance)?;

        if !(self.filters.default_intensity.is_finite() && self.filters.default_intensity >= 0.0) {
            return Err(ConfigError::Validation(
                "filters.default_intensity must be a non-negative number".into(),
            ));
        }
        for (i, library) in self.fallback_order.iter().enumerate() {
            if self.fallback_order[..i].contains(library) {
                return Err(ConfigError::Validation(format!(
                    "fallback_order lists '{library}' twice"
                )));
            }
        }
        if self.vision.face_key.is_empty() || self.vision.object_key.is_empty() {
            return Err(ConfigError::Validation(
                "vision detector keys must not be empty".into(),
            ));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Backends in the order they should be tried: the default first, then
    /// the fallback order without repeats.
    pub fn backend_order(&self) -> Vec<Library> {
        let mut order = vec![self.default_backend];
        for &library in &self.fallback_order {
            if !order.contains(&library) {
                order.push(library);
            }
        }
        order
    }
}

/// Encoding defaults for `save_image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    pub format: OutputFormat,
    /// `0.0..=1.0`.
    pub quality: f32,
}

impl Default for SaveConfig {
    fn default() -> Self {
        let options = SaveOptions::default();
        Self {
            format: options.format,
            quality: options.quality,
        }
    }
}

impl SaveConfig {
    pub fn options(&self) -> SaveOptions {
        SaveOptions::new(self.format, self.quality)
    }
}

/// Detector lookup and detection thresholds for the vision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    /// Directory of `<key>.toml` detector assets. Without it no detector
    /// assets are loaded and detection returns nothing.
    pub asset_dir: Option<PathBuf>,
    pub face_key: String,
    pub object_key: String,
    pub min_confidence: f32,
    pub background_tolerance: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            asset_dir: None,
            face_key: "face".into(),
            object_key: "object".into(),
            min_confidence: 0.5,
            background_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub default_intensity: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { default_intensity: 1.0 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of rayon workers for per-pixel loops.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Worker threads for the rayon pool: every core unless `max_threads`
/// asks for fewer.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    config.max_threads.map_or(cores, |n| n.min(cores))
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`, the base layer
/// user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ProcessorConfig::default())?)
}

/// Layer `overlay` over `base`. Tables merge key by key at every depth; any
/// other overlay value replaces what was there.
pub fn merge_toml(mut base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (&mut base, overlay) {
        (toml::Value::Table(table), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                let merged = match table.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                table.insert(key, merged);
            }
            base
        }
        (_, replacement) => replacement,
    }
}

/// Read a config file as a raw TOML value. A missing file is `Ok(None)`.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<ProcessorConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ProcessorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to the stock defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<ProcessorConfig, ConfigError> {
    let config = resolve_config(load_raw_config(path)?)?;
    log::debug!("configuration resolved from {}", path.display());
    Ok(config)
}

/// Returns a fully-commented stock `pixelworks.toml` with all keys.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pixelworks configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Backend tried first by `apply`, `analyze` and `detect`.
# One of: native, vision, canvas, software.
default_backend = "native"

# Backends tried, in order, when the default one cannot do an operation.
fallback_order = ["native", "vision", "canvas", "software"]

# ---------------------------------------------------------------------------
# Output encoding
# ---------------------------------------------------------------------------
[save]
# png, jpeg, webp (lossless) or avif. Not every backend writes every format.
format = "png"

# Encoder quality, 0.0 (worst) to 1.0 (best). Ignored by png and webp.
quality = 0.9

# ---------------------------------------------------------------------------
# Vision backend
# ---------------------------------------------------------------------------
[vision]
# Directory holding <key>.toml detector assets. Without it detection
# returns nothing.
# asset_dir = "detectors"

# Asset keys looked up for face and object detection.
face_key = "face"
object_key = "object"

# Detections scoring below this are dropped (0.0-1.0).
min_confidence = 0.5

# Colour distance from the border colour that counts as background
# for background removal (0.0-1.0).
background_tolerance = 0.1

# ---------------------------------------------------------------------------
# Filters
# ---------------------------------------------------------------------------
[filters]
# Intensity used when a filter operation does not give one.
default_intensity = 1.0

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for per-pixel loops.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}
