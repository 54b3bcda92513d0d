//! Command-line interface for the u-track loader.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{LoaderConfig, NormalizeMethod};
use crate::core::transforms::AxisConvention;
use crate::core::writers;
use crate::pipeline::{self, LoadRequest, RANDOM_ID_PROPERTY};
use crate::processors::inspection;
use crate::viewer::{ArtifactRegistry, StatusReporter};
use crate::visualization;

#[derive(Parser)]
#[command(name = "utrack-loader")]
#[command(about = "Load u-track detections, tracks and image stacks", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load image stacks, detections and tracks and report the resulting layers
    Load {
        /// Directories of .tif slices, one stack per directory
        #[arg(long, num_args = 1..)]
        images: Vec<PathBuf>,
        /// Detection JSON files
        #[arg(long, num_args = 1..)]
        detections: Vec<PathBuf>,
        /// Track JSON files
        #[arg(long, num_args = 1..)]
        tracks: Vec<PathBuf>,
        /// Export loaded points and tracks as CSV into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Axis convention of the JSON coordinates (zyx, xyz, xzy)
        #[arg(long)]
        json_format: Option<String>,
        /// Intensity normalization of image stacks
        #[arg(long, value_parser = ["off", "min-max", "percentile"])]
        normalize: Option<String>,
        /// Normalize every frame on its own bounds
        #[arg(long)]
        per_frame: bool,
        /// Median filter kernel size applied to every frame
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=20))]
        median_filter: Option<u16>,
        /// Worker threads for the median filter (defaults to one per core)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Resolve a clicked position to a track and sample image intensities along it
    Inspect {
        /// Track JSON file
        #[arg(long)]
        tracks: PathBuf,
        /// Image stack directories to sample
        #[arg(long, num_args = 1..)]
        images: Vec<PathBuf>,
        /// Clicked position as t,y,x or t,z,y,x
        #[arg(long, allow_hyphen_values = true)]
        position: String,
        /// Largest accepted distance between position and track vertex
        #[arg(long, default_value_t = 2.0)]
        tolerance: f32,
        /// Pixel size per spatial axis as y,x or z,y,x (defaults to 1)
        #[arg(long)]
        pixel_size: Option<String>,
        /// Output PNG file for the intensity-vs-frame plot
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the default configuration to a YAML file
    InitConfig {
        /// Output YAML path
        path: PathBuf,
    },
}

/// Status sink drawing stage progress on an indicatif bar.
struct ProgressStatus {
    bar: ProgressBar,
}

impl ProgressStatus {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<20} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=> "));
        Self { bar }
    }
}

impl StatusReporter for ProgressStatus {
    fn set_busy(&self, busy: bool) {
        if busy {
            self.bar.enable_steady_tick(Duration::from_millis(100));
        } else {
            self.bar.finish_and_clear();
        }
    }

    fn progress(&self, stage: &str, current: usize, total: usize) {
        self.bar.set_message(stage.to_string());
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }

    fn notice(&self, message: &str) {
        warn!("{}", message);
        self.bar.println(format!("! {}", message));
    }
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Parse a comma-separated list of numbers such as `3,10.5,4`.
fn parse_floats(text: &str) -> Result<Vec<f32>> {
    text.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("'{}' is not a number in '{}'", part.trim(), text))
        })
        .collect()
}

/// File name for exporting a layer, with unsafe characters replaced.
fn export_file_name(layer_name: &str) -> String {
    let stem: String = layer_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}.csv", stem)
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match LoaderConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                LoaderConfig::default()
            }
        },
        None => LoaderConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::Load {
            images,
            detections,
            tracks,
            output_dir,
            json_format,
            normalize,
            per_frame,
            median_filter,
            workers,
        } => {
            let request = LoadRequest {
                image_dirs: images,
                detection_files: detections,
                track_files: tracks,
            };
            let overrides = LoadOverrides {
                json_format,
                normalize,
                per_frame,
                median_filter,
                workers,
            };
            cmd_load(&request, output_dir.as_deref(), overrides, config)
        }
        Commands::Inspect {
            tracks,
            images,
            position,
            tolerance,
            pixel_size,
            output,
        } => cmd_inspect(&tracks, images, &position, tolerance, pixel_size.as_deref(), output, &config),
        Commands::InitConfig { path } => cmd_init_config(&path),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Command-line values that take precedence over the config file.
struct LoadOverrides {
    json_format: Option<String>,
    normalize: Option<String>,
    per_frame: bool,
    median_filter: Option<u16>,
    workers: Option<usize>,
}

impl LoadOverrides {
    fn apply(self, config: &mut LoaderConfig) -> Result<()> {
        if let Some(format) = self.json_format {
            config.coordinates.json_format = format.parse::<AxisConvention>()?;
        }
        if let Some(method) = self.normalize {
            config.image.normalize.method = match method.as_str() {
                "off" => NormalizeMethod::Off,
                "min-max" => NormalizeMethod::MinMax,
                "percentile" => NormalizeMethod::Percentile,
                other => bail!("unknown normalization '{}'", other),
            };
        }
        if self.per_frame {
            config.image.normalize.per_frame = true;
        }
        if let Some(kernel) = self.median_filter {
            config.image.median_filter.enabled = true;
            config.image.median_filter.kernel_size = kernel as usize;
        }
        if self.workers.is_some() {
            config.image.workers = self.workers;
        }
        Ok(())
    }
}

fn cmd_load(
    request: &LoadRequest,
    output_dir: Option<&Path>,
    overrides: LoadOverrides,
    mut config: LoaderConfig,
) -> Result<()> {
    let start = Instant::now();
    overrides.apply(&mut config)?;

    if request.is_empty() {
        bail!("nothing to load: pass --images, --detections or --tracks");
    }

    let mut registry = ArtifactRegistry::new();
    let status = ProgressStatus::new();
    let summary = pipeline::load_all(request, &config, &mut registry, &status)?;

    let mut exported = 0;
    if let Some(dir) = output_dir {
        for layer in registry.points() {
            let path = dir.join(export_file_name(&layer.name));
            writers::write_points_csv(&path, layer.data.view())
                .with_context(|| format!("Failed to export {}", layer.name))?;
            info!("Exported {} to {}", layer.name, path.display());
            exported += 1;
        }
        for layer in registry.tracks() {
            let path = dir.join(export_file_name(&layer.name));
            let random_id = layer.properties.get(RANDOM_ID_PROPERTY).map(|p| p.view());
            writers::write_tracks_csv(&path, layer.data.view(), random_id)
                .with_context(|| format!("Failed to export {}", layer.name))?;
            info!("Exported {} to {}", layer.name, path.display());
            exported += 1;
        }
    }

    let mut items: Vec<(&str, String)> = Vec::new();
    for layer in registry.images() {
        items.push(("Image", format!("{} {:?}", layer.name, layer.data.shape())));
    }
    for layer in registry.points() {
        items.push(("Points", format!("{} ({} detections)", layer.name, layer.data.nrows())));
    }
    for layer in registry.tracks() {
        items.push(("Tracks", format!("{} ({} vertices)", layer.name, layer.data.nrows())));
    }
    items.push(("Skipped inputs", summary.skipped.len().to_string()));
    if output_dir.is_some() {
        items.push(("CSV exports", exported.to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Load Complete", &items);
    Ok(())
}

fn cmd_inspect(
    tracks: &Path,
    images: Vec<PathBuf>,
    position: &str,
    tolerance: f32,
    pixel_size: Option<&str>,
    output: Option<PathBuf>,
    config: &LoaderConfig,
) -> Result<()> {
    let position = parse_floats(position).context("Invalid --position")?;
    let pixel_size = pixel_size
        .map(parse_floats)
        .transpose()
        .context("Invalid --pixel-size")?;

    let request = LoadRequest {
        image_dirs: images,
        detection_files: Vec::new(),
        track_files: vec![tracks.to_path_buf()],
    };

    let mut registry = ArtifactRegistry::new();
    let status = ProgressStatus::new();
    pipeline::load_all(&request, config, &mut registry, &status)?;

    let profile = inspection::inspect_track(&registry, &position, tolerance, pixel_size.as_deref())
        .with_context(|| format!("Inspection at {:?} failed", position))?;

    println!("Track {} ({} vertices)", profile.track_id, profile.vertices.nrows());
    for series in &profile.intensities {
        println!("  {}", series.image_name);
        for (frame, value) in series.frames.iter().zip(&series.values) {
            println!("    t={:<6} {}", frame, value);
        }
    }

    if let Some(path) = output {
        visualization::plot_intensity_profile(&path, &profile)
            .with_context(|| format!("Failed to plot {}", path.display()))?;
        println!("Saved plot to {}", path.display());
    }

    Ok(())
}

fn cmd_init_config(path: &Path) -> Result<()> {
    LoaderConfig::default()
        .to_yaml(path)
        .map_err(|e| anyhow::anyhow!("Failed to write config to {}: {}", path.display(), e))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
