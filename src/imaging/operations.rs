//! High-level operations over a set of backends.
//!
//! An [`Operation`] is one pixel transform described as data, so a chain of
//! them can come from the command line or a JSON file. [`apply`] runs one on
//! a single backend; [`BackendSet::apply_with_fallback`] picks backends whose
//! declared capabilities cover the operation and tries them in configured
//! order until one succeeds.

use super::backend::{BackendError, Capability, ImageProcessor, Library, OpError, ProcessingResult, run_op};
use super::canvas::CanvasBackend;
use super::native::NativeBackend;
use super::params::{CropRect, ResizeParams, SaveOptions};
use super::resources::HandleLedger;
use super::software::SoftwareBackend;
use super::vision::VisionBackend;
use super::vision::detector::{DetectorCache, DirectoryLoader};
use crate::config::ProcessorConfig;
use crate::types::{ImageSource, PixelBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One pixel transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    Resize { width: u32, height: u32 },
    Crop(CropRect),
    Rotate { degrees: f32 },
    Filter {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intensity: Option<f32>,
    },
    Brightness { value: f32 },
    Contrast { value: f32 },
    Blur { radius: f32 },
    Sharpen { amount: f32 },
    Edges { threshold: f32 },
    RemoveBackground,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resize { .. } => "resize",
            Operation::Crop(_) => "crop",
            Operation::Rotate { .. } => "rotate",
            Operation::Filter { .. } => "filter",
            Operation::Brightness { .. } => "brightness",
            Operation::Contrast { .. } => "contrast",
            Operation::Blur { .. } => "blur",
            Operation::Sharpen { .. } => "sharpen",
            Operation::Edges { .. } => "edges",
            Operation::RemoveBackground => "remove-background",
        }
    }

    /// Capability a backend must declare to be asked for this operation.
    pub fn capability(&self) -> Capability {
        match self {
            Operation::Resize { .. } => Capability::Resize,
            Operation::Crop(_) => Capability::Crop,
            Operation::Rotate { .. } => Capability::Rotate,
            Operation::Edges { .. } => Capability::EdgeDetection,
            Operation::RemoveBackground => Capability::BackgroundRemoval,
            _ => Capability::Filter,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn number<T: FromStr>(op: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid value '{raw}' for {op}"))
}

/// Command-line form: `resize=320x200`, `crop=x,y,w,h`, `rotate=90`,
/// `filter=sepia` or `filter=blur:2`, `brightness=0.2`, `contrast=-0.3`,
/// `blur=2`, `sharpen=1`, `edges=0.5`, `remove-background`.
impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, arg) = match s.split_once('=') {
            Some((op, arg)) => (op.trim(), Some(arg)),
            None => (s.trim(), None),
        };
        let arg = |what: &str| arg.ok_or_else(|| format!("{op} needs a value ({what})"));
        match op {
            "resize" => {
                let raw = arg("WIDTHxHEIGHT")?;
                let (w, h) = raw
                    .split_once('x')
                    .ok_or_else(|| format!("resize expects WIDTHxHEIGHT, got '{raw}'"))?;
                Ok(Operation::Resize {
                    width: number(op, w)?,
                    height: number(op, h)?,
                })
            }
            "crop" => {
                let raw = arg("X,Y,WIDTH,HEIGHT")?;
                let parts: Vec<u32> = raw
                    .split(',')
                    .map(|p| number(op, p))
                    .collect::<Result<_, _>>()?;
                match parts[..] {
                    [x, y, width, height] => Ok(Operation::Crop(CropRect { x, y, width, height })),
                    _ => Err(format!("crop expects X,Y,WIDTH,HEIGHT, got '{raw}'")),
                }
            }
            "rotate" => Ok(Operation::Rotate {
                degrees: number(op, arg("DEGREES")?)?,
            }),
            "filter" => {
                let raw = arg("NAME[:INTENSITY]")?;
                let (name, intensity) = match raw.split_once(':') {
                    Some((name, i)) => (name, Some(number(op, i)?)),
                    None => (raw, None),
                };
                Ok(Operation::Filter {
                    name: name.trim().to_string(),
                    intensity,
                })
            }
            "brightness" => Ok(Operation::Brightness {
                value: number(op, arg("VALUE")?)?,
            }),
            "contrast" => Ok(Operation::Contrast {
                value: number(op, arg("VALUE")?)?,
            }),
            "blur" => Ok(Operation::Blur {
                radius: number(op, arg("RADIUS")?)?,
            }),
            "sharpen" => Ok(Operation::Sharpen {
                amount: number(op, arg("AMOUNT")?)?,
            }),
            "edges" => Ok(Operation::Edges {
                threshold: number(op, arg("THRESHOLD")?)?,
            }),
            "remove-background" => Ok(Operation::RemoveBackground),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// Run `op` on one backend. `default_intensity` fills in a filter without one.
pub fn apply(
    backend: &dyn ImageProcessor,
    op: &Operation,
    buffer: &PixelBuffer,
    default_intensity: f32,
) -> ProcessingResult {
    match op {
        Operation::Resize { width, height } => backend.resize(
            buffer,
            &ResizeParams {
                width: *width,
                height: *height,
            },
        ),
        Operation::Crop(rect) => backend.crop(buffer, rect),
        Operation::Rotate { degrees } => backend.rotate(buffer, *degrees),
        Operation::Filter { name, intensity } => {
            backend.apply_filter(buffer, name, intensity.unwrap_or(default_intensity))
        }
        Operation::Brightness { value } => backend.adjust_brightness(buffer, *value),
        Operation::Contrast { value } => backend.adjust_contrast(buffer, *value),
        Operation::Blur { radius } => backend.blur(buffer, *radius),
        Operation::Sharpen { amount } => backend.sharpen(buffer, *amount),
        Operation::Edges { threshold } => backend.detect_edges(buffer, *threshold),
        Operation::RemoveBackground => backend.remove_background(buffer),
    }
}

/// The configured backends, in the order they should be tried.
pub struct BackendSet {
    backends: Vec<Box<dyn ImageProcessor>>,
    default_intensity: f32,
}

impl BackendSet {
    /// Backends tried in the given order.
    pub fn new(backends: Vec<Box<dyn ImageProcessor>>, default_intensity: f32) -> Self {
        Self {
            backends,
            default_intensity,
        }
    }

    /// Every backend the config names, sharing one ledger and one detector
    /// cache for the life of the set.
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self::with_ledger(config, Arc::new(HandleLedger::new()))
    }

    pub fn with_ledger(config: &ProcessorConfig, ledger: Arc<HandleLedger>) -> Self {
        let detectors = Arc::new(match &config.vision.asset_dir {
            Some(dir) => DetectorCache::new(DirectoryLoader::new(dir)),
            None => DetectorCache::empty(),
        });
        let backends = config
            .backend_order()
            .into_iter()
            .map(|library| -> Box<dyn ImageProcessor> {
                let ledger = Arc::clone(&ledger);
                match library {
                    Library::Canvas => Box::new(CanvasBackend::with_ledger(ledger)),
                    Library::Vision => Box::new(VisionBackend::with_ledger(
                        ledger,
                        Arc::clone(&detectors),
                        config.vision.clone(),
                    )),
                    Library::Native => Box::new(NativeBackend::with_ledger(ledger)),
                    Library::Software => Box::new(SoftwareBackend::with_ledger(ledger)),
                }
            })
            .collect();
        log::debug!("backend order: {:?}", config.backend_order());
        Self::new(backends, config.filters.default_intensity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ImageProcessor> {
        self.backends.iter().map(|b| b.as_ref())
    }

    pub fn get(&self, library: Library) -> Option<&dyn ImageProcessor> {
        self.iter().find(|b| b.library() == library)
    }

    /// First backend declaring `capability`.
    pub fn first_capable(&self, capability: Capability) -> Option<&dyn ImageProcessor> {
        self.iter().find(|b| b.capabilities().supports(capability))
    }

    /// Decode with the first backend that accepts the input.
    pub fn load_with_fallback(&self, source: &ImageSource) -> Result<(Library, PixelBuffer), BackendError> {
        self.first_ok("load", |b| b.load_image(source))
    }

    /// Encode with the first backend that writes `options.format`.
    pub fn save_with_fallback(
        &self,
        buffer: &PixelBuffer,
        options: &SaveOptions,
    ) -> Result<(Library, Vec<u8>), BackendError> {
        self.first_ok("save", |b| b.save_image(buffer, options))
    }

    fn first_ok<T>(
        &self,
        what: &str,
        f: impl Fn(&dyn ImageProcessor) -> Result<T, BackendError>,
    ) -> Result<(Library, T), BackendError> {
        let mut last = BackendError::NotImplemented(format!("no backend configured to {what}"));
        for backend in self.iter() {
            match f(backend) {
                Ok(value) => return Ok((backend.library(), value)),
                Err(e) => {
                    log::debug!("{} could not {what}: {e}", backend.library());
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Try every backend that declares the operation's capability, in order,
    /// until one succeeds. The last failure is returned when none does.
    pub fn apply_with_fallback(&self, op: &Operation, buffer: &PixelBuffer) -> ProcessingResult {
        let capability = op.capability();
        let mut last = None;
        for backend in self.iter().filter(|b| b.capabilities().supports(capability)) {
            let result = apply(backend, op, buffer, self.default_intensity);
            if result.is_success() {
                return result;
            }
            log::info!(
                "{} could not {op}: {}; trying next backend",
                backend.library(),
                result.error().unwrap_or_default()
            );
            last = Some(result);
        }
        last.unwrap_or_else(|| {
            let library = self.iter().next().map_or(Library::Software, |b| b.library());
            run_op(library, op.name(), || {
                Err(OpError::InvalidArgument(format!("no configured backend supports {op}")))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::Capabilities;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::*;

    fn set(backends: Vec<MockBackend>) -> BackendSet {
        BackendSet::new(
            backends
                .into_iter()
                .map(|b| Box::new(b) as Box<dyn ImageProcessor>)
                .collect(),
            1.0,
        )
    }

    #[test]
    fn parses_command_line_operations() {
        assert_eq!(
            "resize=320x200".parse::<Operation>().unwrap(),
            Operation::Resize { width: 320, height: 200 }
        );
        assert_eq!(
            "crop=1,2,3,4".parse::<Operation>().unwrap(),
            Operation::Crop(CropRect { x: 1, y: 2, width: 3, height: 4 })
        );
        assert_eq!(
            "filter=blur:2.5".parse::<Operation>().unwrap(),
            Operation::Filter { name: "blur".into(), intensity: Some(2.5) }
        );
        assert_eq!(
            "filter=sepia".parse::<Operation>().unwrap(),
            Operation::Filter { name: "sepia".into(), intensity: None }
        );
        assert_eq!("rotate=-90".parse::<Operation>().unwrap(), Operation::Rotate { degrees: -90.0 });
        assert_eq!("remove-background".parse::<Operation>().unwrap(), Operation::RemoveBackground);
    }

    #[test]
    fn rejects_malformed_operations() {
        assert!("resize=320".parse::<Operation>().is_err());
        assert!("crop=1,2,3".parse::<Operation>().is_err());
        assert!("rotate".parse::<Operation>().unwrap_err().contains("needs a value"));
        assert_eq!(
            "warp=3".parse::<Operation>().unwrap_err(),
            "unknown operation 'warp'"
        );
    }

    #[test]
    fn operations_deserialize_from_json() {
        let ops: Vec<Operation> = serde_json::from_str(
            r#"[{"op":"resize","width":4,"height":2},{"op":"filter","name":"invert"},{"op":"crop","x":0,"y":0,"width":1,"height":1}]"#,
        )
        .unwrap();
        assert_eq!(ops[0], Operation::Resize { width: 4, height: 2 });
        assert_eq!(ops[1], Operation::Filter { name: "invert".into(), intensity: None });
        assert_eq!(ops[2].capability(), Capability::Crop);
    }

    #[test]
    fn apply_fills_default_intensity() {
        let backend = MockBackend::new(Library::Software);
        let op = Operation::Filter { name: "blur".into(), intensity: None };
        assert!(apply(&backend, &op, &solid(2, 2, [0, 0, 0]), 1.5).is_success());
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Filter { name: "blur".into(), intensity: 1.5 }]
        );
    }

    #[test]
    fn fallback_moves_past_failures() {
        let backends = set(vec![
            MockBackend::failing(Library::Canvas, "canvas broke"),
            MockBackend::new(Library::Software),
        ]);
        let result = backends.apply_with_fallback(&Operation::Blur { radius: 1.0 }, &solid(2, 2, [1, 1, 1]));
        assert!(result.is_success());
        assert_eq!(result.library, Library::Software);
    }

    #[test]
    fn fallback_skips_backends_without_capability() {
        let no_resize = Capabilities {
            resize: false,
            ..Capabilities::basic()
        };
        let backends = set(vec![
            MockBackend::new(Library::Canvas).with_capabilities(no_resize),
            MockBackend::new(Library::Native),
        ]);
        let op = Operation::Resize { width: 1, height: 1 };
        let result = backends.apply_with_fallback(&op, &solid(2, 2, [1, 1, 1]));
        assert_eq!(result.library, Library::Native);
        let canvas = backends.get(Library::Canvas).unwrap();
        assert_eq!(canvas.library(), Library::Canvas);
    }

    #[test]
    fn fallback_reports_last_failure_or_missing_capability() {
        let backends = set(vec![
            MockBackend::failing(Library::Canvas, "first"),
            MockBackend::failing(Library::Software, "second"),
        ]);
        let result = backends.apply_with_fallback(&Operation::Sharpen { amount: 1.0 }, &solid(1, 1, [0, 0, 0]));
        assert_eq!(result.error(), Some("second"));

        let result = backends.apply_with_fallback(&Operation::Edges { threshold: 0.5 }, &solid(1, 1, [0, 0, 0]));
        assert_eq!(result.error(), Some("no configured backend supports edges"));
        assert_eq!(result.library, Library::Canvas);
    }

    #[test]
    fn from_config_builds_all_backends_in_order() {
        let config = ProcessorConfig {
            default_backend: Library::Software,
            ..ProcessorConfig::default()
        };
        let backends = BackendSet::from_config(&config);
        let order: Vec<Library> = backends.iter().map(|b| b.library()).collect();
        assert_eq!(order, vec![Library::Software, Library::Native, Library::Vision, Library::Canvas]);
        assert_eq!(
            backends.first_capable(Capability::EdgeDetection).map(|b| b.library()),
            Some(Library::Vision)
        );
    }

    #[test]
    fn save_falls_through_to_a_backend_that_writes_the_format() {
        let backends = BackendSet::from_config(&ProcessorConfig {
            default_backend: Library::Canvas,
            ..ProcessorConfig::default()
        });
        let buf = gradient(8, 8, 3);
        let (library, bytes) = backends
            .save_with_fallback(&buf, &SaveOptions::new(crate::imaging::OutputFormat::Avif, 0.8))
            .unwrap();
        assert_eq!(library, Library::Native);
        let (library, _) = backends.load_with_fallback(&bytes.into()).unwrap();
        assert_eq!(library, Library::Native);
    }

    #[test]
    fn empty_set_cannot_load() {
        let backends = set(Vec::new());
        let err = backends.load_with_fallback(&encode_png(&solid(1, 1, [0, 0, 0])).into()).unwrap_err();
        assert_eq!(err.to_string(), "not implemented: no backend configured to load");
    }

    #[test]
    fn edges_fall_through_to_vision() {
        let ledger = Arc::new(HandleLedger::new());
        let backends = BackendSet::with_ledger(&ProcessorConfig::default(), Arc::clone(&ledger));
        let result = backends.apply_with_fallback(&Operation::Edges { threshold: 0.5 }, &gradient(6, 6, 4));
        assert!(result.is_success());
        assert_eq!(result.library, Library::Vision);
        assert_balanced(&ledger);
    }
}
