use clap::{Parser, Subcommand};
use pixelworks::config::{self, ProcessorConfig};
use pixelworks::imaging::{BackendSet, Capability, ImageMetadata, ImageProcessor, Library, Operation, OutputFormat, SaveOptions};
use pixelworks::types::{ImageSource, PixelBuffer};
use serde_json::json;
use std::path::{Path, PathBuf};

fn version_string() -> &'static str {
    let release = env!("PIXELWORKS_RELEASE");
    if release == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("PIXELWORKS_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Called once from clap setup.
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "pixelworks")]
#[command(about = "Run images through interchangeable processing backends")]
#[command(long_about = "\
Run images through interchangeable processing backends

Four engines implement the same operations:

  canvas    surface compositing: filters, affine resize and rotate
  vision    dense matrices: edges, face and object detection, background removal
  native    pipeline engine: Lanczos resize, AVIF in and out, metadata
  software  plain pixel loops, no native state

Backends are tried in the configured order; an operation goes to the first
backend that declares it and succeeds.

Operations for `apply --op` (repeat to chain):

  resize=WxH  crop=X,Y,W,H  rotate=DEG  filter=NAME[:INTENSITY]
  brightness=V  contrast=V  blur=R  sharpen=A  edges=T  remove-background

Run 'pixelworks gen-config' to print a documented pixelworks.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file; missing means stock defaults
    #[arg(long, default_value = "pixelworks.toml", global = true)]
    config: PathBuf,

    /// Try this backend first, overriding `default_backend`
    #[arg(long, global = true)]
    backend: Option<Library>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured backends and their capabilities
    Backends,
    /// Print format, size and embedded metadata of an image
    Info { file: PathBuf },
    /// Brightness, contrast, sharpness and dominant colours
    Analyze { file: PathBuf },
    /// Find faces and objects
    Detect { file: PathBuf },
    /// Apply a chain of operations and write the result
    Apply {
        input: PathBuf,
        /// Output file; the extension picks the format unless --format is set
        #[arg(short, long)]
        output: PathBuf,
        /// Operation, repeatable (see --help)
        #[arg(long = "op")]
        ops: Vec<Operation>,
        /// JSON file with an array of operations, run after any --op
        #[arg(long)]
        ops_file: Option<PathBuf>,
        #[arg(long)]
        format: Option<OutputFormat>,
        /// Encoder quality, 0.0 to 1.0
        #[arg(long)]
        quality: Option<f32>,
    },
    /// Print a stock pixelworks.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let setup = || -> Result<(ProcessorConfig, BackendSet), config::ConfigError> {
        let mut config = config::load_config(&cli.config)?;
        if let Some(library) = cli.backend {
            config.default_backend = library;
        }
        config.validate()?;
        init_thread_pool(&config.processing);
        let backends = BackendSet::from_config(&config);
        Ok((config, backends))
    };

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Backends => {
            let (_, backends) = setup()?;
            let list: Vec<_> = backends
                .iter()
                .map(|b| json!({ "library": b.library(), "capabilities": b.capabilities() }))
                .collect();
            print_json(&list)?;
        }
        Command::Info { file } => {
            let (_, backends) = setup()?;
            let bytes = std::fs::read(&file)?;
            let metadata = first_metadata(&backends, &bytes)?;
            print_json(&metadata)?;
        }
        Command::Analyze { file } => {
            let (_, backends) = setup()?;
            let (_, buffer) = load(&backends, &file)?;
            let analyzer = backends
                .first_capable(Capability::ColorAnalysis)
                .ok_or("no configured backend analyzes colour")?;
            let result = analyzer.analyze(&buffer);
            let analysis = result.outcome.map_err(|e| format!("{}: {e}", result.library))?;
            print_json(&json!({
                "library": result.library,
                "processing_time_ms": result.processing_time.as_secs_f64() * 1000.0,
                "analysis": analysis,
            }))?;
        }
        Command::Detect { file } => {
            let (_, backends) = setup()?;
            let (_, buffer) = load(&backends, &file)?;
            let faces = backends
                .first_capable(Capability::FaceDetection)
                .map(|b| b.detect_faces(&buffer))
                .unwrap_or_default();
            let objects = backends
                .first_capable(Capability::ObjectDetection)
                .map(|b| b.detect_objects(&buffer))
                .unwrap_or_default();
            print_json(&json!({ "faces": faces, "objects": objects }))?;
        }
        Command::Apply {
            input,
            output,
            mut ops,
            ops_file,
            format,
            quality,
        } => {
            if let Some(path) = ops_file {
                let extra: Vec<Operation> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                ops.extend(extra);
            }
            let (config, backends) = setup()?;
            let options = save_options(&config, &output, format, quality)?;
            let (loaded_by, mut buffer) = load(&backends, &input)?;
            log::info!("{} loaded by {loaded_by}: {}x{}", input.display(), buffer.width, buffer.height);
            for op in &ops {
                let result = backends.apply_with_fallback(op, &buffer);
                let library = result.library;
                let elapsed = result.processing_time;
                buffer = result.outcome.map_err(|e| format!("{op} failed ({library}): {e}"))?;
                log::info!("{op} by {library} in {elapsed:?}");
            }
            let (saved_by, bytes) = backends.save_with_fallback(&buffer, &options)?;
            std::fs::write(&output, bytes)?;
            println!("{} → {} ({}, {saved_by})", input.display(), output.display(), options.format);
        }
    }

    Ok(())
}

fn load(backends: &BackendSet, file: &Path) -> Result<(Library, PixelBuffer), Box<dyn std::error::Error>> {
    let source = ImageSource::Path(file.to_path_buf());
    backends
        .load_with_fallback(&source)
        .map_err(|e| format!("{}: {e}", file.display()).into())
}

fn first_metadata(
    backends: &BackendSet,
    bytes: &[u8],
) -> Result<ImageMetadata, Box<dyn std::error::Error>> {
    let mut last = None;
    for backend in backends.iter() {
        match backend.get_metadata(bytes) {
            Ok(metadata) => return Ok(metadata),
            Err(e) => last = Some(e),
        }
    }
    Err(last.map_or_else(|| "no backend configured".into(), Into::into))
}

/// Explicit flags win, then the output extension, then the config.
fn save_options(
    config: &ProcessorConfig,
    output: &Path,
    format: Option<OutputFormat>,
    quality: Option<f32>,
) -> Result<SaveOptions, String> {
    let mut options = config.save.options();
    let from_extension = output
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse::<OutputFormat>().ok());
    if let Some(format) = format.or(from_extension) {
        options.format = format;
    }
    if let Some(quality) = quality {
        if !(0.0..=1.0).contains(&quality) {
            return Err(format!("quality must be between 0.0 and 1.0, got {quality}"));
        }
        options.quality = quality;
    }
    Ok(options)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
