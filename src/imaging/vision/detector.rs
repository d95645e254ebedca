//! Detector assets and the cache that keeps them loaded.
//!
//! A [`Classifier`] scans a YCrCb matrix and returns scored rectangles,
//! mirroring a cascade's `detect_multi_scale`. Classifiers are loaded by key
//! (`"face"`, `"object"`) through an [`AssetLoader`] and kept in a
//! [`DetectorCache`] for the life of the application.
//!
//! The cache is read-mostly: a lookup of an already loaded key takes only the
//! read lock, and each key's loader runs at most once even when several
//! threads ask for it at the same time. A key whose asset is missing or broken
//! is cached as absent; detection with it returns nothing.

use super::mat::{self, Mat};
use crate::imaging::backend::BoundingBox;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("no detector asset for '{0}'")]
    Missing(String),
    #[error("failed to read detector asset {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid detector asset {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// One candidate region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredRect {
    pub rect: BoundingBox,
    pub confidence: f32,
}

pub trait Classifier: Send + Sync {
    fn label(&self) -> &str;

    /// Candidate regions in a full-range YCrCb matrix, best first.
    fn detect_multi_scale(&self, ycrcb: &Mat) -> Vec<ScoredRect>;
}

/// Where classifiers come from.
pub trait AssetLoader: Send + Sync {
    fn load(&self, key: &str) -> Result<Arc<dyn Classifier>, DetectorError>;
}

/// Loader with no assets; every key is missing.
#[derive(Debug, Default)]
pub struct NoAssets;

impl AssetLoader for NoAssets {
    fn load(&self, key: &str) -> Result<Arc<dyn Classifier>, DetectorError> {
        Err(DetectorError::Missing(key.to_string()))
    }
}

/// Reads `<root>/<key>.toml` colour-region descriptions.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetLoader for DirectoryLoader {
    fn load(&self, key: &str) -> Result<Arc<dyn Classifier>, DetectorError> {
        let path = self.root.join(format!("{key}.toml"));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DetectorError::Missing(key.to_string()));
            }
            Err(source) => return Err(DetectorError::Io { path, source }),
        };
        let asset: RegionClassifier = toml::from_str(&text).map_err(|e| DetectorError::Invalid {
            path: path.clone(),
            message: e.to_string(),
        })?;
        asset
            .validate()
            .map_err(|message| DetectorError::Invalid { path, message })?;
        Ok(Arc::new(asset))
    }
}

type Slot = Arc<OnceLock<Option<Arc<dyn Classifier>>>>;

/// Keyed, load-once store of classifiers.
pub struct DetectorCache {
    loader: Box<dyn AssetLoader>,
    slots: RwLock<HashMap<String, Slot>>,
}

impl DetectorCache {
    pub fn new(loader: impl AssetLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Cache with nothing to load.
    pub fn empty() -> Self {
        Self::new(NoAssets)
    }

    /// Preload a classifier under `key`. A key that is already settled keeps
    /// its value; returns whether `classifier` was stored.
    pub fn insert(&self, key: &str, classifier: Arc<dyn Classifier>) -> bool {
        self.slot(key).set(Some(classifier)).is_ok()
    }

    /// The classifier for `key`, loading it on first use.
    pub fn get_or_load(&self, key: &str) -> Option<Arc<dyn Classifier>> {
        self.slot(key)
            .get_or_init(|| match self.loader.load(key) {
                Ok(classifier) => {
                    log::debug!("loaded detector '{key}' ({})", classifier.label());
                    Some(classifier)
                }
                Err(DetectorError::Missing(_)) => {
                    log::debug!("no detector asset for '{key}'");
                    None
                }
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            })
            .clone()
    }

    /// Keys that have been requested or inserted so far.
    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Slot {
        if let Ok(slots) = self.slots.read() {
            if let Some(slot) = slots.get(key) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(key.to_string()).or_default())
    }
}

impl fmt::Debug for DetectorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorCache").field("keys", &self.len()).finish()
    }
}

/// Classifier that finds connected regions whose chroma falls in a box.
///
/// The stock face asset is a skin-tone box (`cr = [133, 173]`,
/// `cb = [77, 127]`). Confidence is how much of the bounding box the region
/// fills.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionClassifier {
    pub label: String,
    pub cr: [u8; 2],
    pub cb: [u8; 2],
    #[serde(default = "default_luma")]
    pub luma: [u8; 2],
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_min_fill")]
    pub min_fill: f32,
}

fn default_luma() -> [u8; 2] {
    [40, 255]
}

fn default_min_size() -> u32 {
    8
}

fn default_min_fill() -> f32 {
    0.4
}

impl RegionClassifier {
    pub fn skin_tone() -> Self {
        Self {
            label: "face".into(),
            cr: [133, 173],
            cb: [77, 127],
            luma: default_luma(),
            min_size: default_min_size(),
            min_fill: default_min_fill(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (name, [lo, hi]) in [("cr", self.cr), ("cb", self.cb), ("luma", self.luma)] {
            if lo > hi {
                return Err(format!("{name} range [{lo}, {hi}] is inverted"));
            }
        }
        if !(0.0..=1.0).contains(&self.min_fill) {
            return Err(format!("min_fill {} must be within 0..1", self.min_fill));
        }
        Ok(())
    }

    fn matches(&self, px: &[u8]) -> bool {
        let inside = |v: u8, [lo, hi]: [u8; 2]| (lo..=hi).contains(&v);
        inside(px[0], self.luma) && inside(px[1], self.cr) && inside(px[2], self.cb)
    }
}

impl Classifier for RegionClassifier {
    fn label(&self) -> &str {
        &self.label
    }

    fn detect_multi_scale(&self, ycrcb: &Mat) -> Vec<ScoredRect> {
        let mut mask = Mat::zeros(ycrcb.rows, ycrcb.cols, 1);
        for (m, px) in mask.data.iter_mut().zip(ycrcb.data.chunks_exact(ycrcb.channels)) {
            *m = if self.matches(px) { 255 } else { 0 };
        }
        let mut found: Vec<(ScoredRect, usize)> = mat::connected_components(&mask)
            .into_iter()
            .filter(|(rect, _)| rect.width >= self.min_size && rect.height >= self.min_size)
            .map(|(rect, area)| {
                let fill = area as f32 / (rect.width as f32 * rect.height as f32);
                (ScoredRect { rect, confidence: fill.min(1.0) }, area)
            })
            .filter(|(scored, _)| scored.confidence >= self.min_fill)
            .collect();
        found.sort_by(|a, b| b.1.cmp(&a.1));
        found.into_iter().map(|(scored, _)| scored).collect()
    }
}
