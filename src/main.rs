#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod capture;
mod config;
mod error;
mod pipeline;
mod samples;
mod tracking;
mod types;
mod ui;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::bounded;
use gpui::Application;

use capture::{CaptureBackend, SyntheticBackend, SyntheticOptions};
use config::VisualizerConfig;
use pipeline::{ChannelSink, FrameSink, PngSink};
use samples::Sample;

/// Frames buffered between the pumps and the viewer.
const VIEWER_QUEUE: usize = 8;

#[derive(Parser)]
#[command(name = "depth-universe")]
#[command(about = "Depth camera samples with skeleton, hand and grab overlays")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write PNG snapshots instead of opening a window
    #[arg(long, global = true)]
    headless: bool,

    /// Stop every pump after this many frames
    #[arg(long, global = true)]
    frames: Option<u64>,

    /// Directory for headless snapshots
    #[arg(long, global = true, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where frames come from
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Synthetic)]
    backend: BackendKind,

    /// Override the depth range used for shading, in millimetres
    #[arg(long, global = true)]
    max_range: Option<u16>,

    /// Number of synthetic devices to expose
    #[arg(long, global = true)]
    devices: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Generated scene, no hardware needed
    Synthetic,
    /// System webcam, color only
    Webcam,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the library version
    Version,
    /// Show the color stream
    Color,
    /// Show the depth stream with the center distance
    Depth,
    /// Show the IR stream
    Ir,
    /// List connected devices
    Devices,
    /// Show depth from every connected device
    Multi,
    /// Print device connect and disconnect events
    Watch,
    /// Show color and depth side by side, m mirrors, c crops
    Streams,
    /// Track users and draw their skeletons
    Skeleton,
    /// Track hands started by a wave or click
    Hands,
    /// Track a hand and report grab and release
    Grab,
}

impl Commands {
    fn sample(&self) -> Option<Sample> {
        match self {
            Commands::Color => Some(Sample::Color),
            Commands::Depth => Some(Sample::Depth),
            Commands::Ir => Some(Sample::Ir),
            Commands::Multi => Some(Sample::Multi),
            Commands::Streams => Some(Sample::Streams),
            Commands::Skeleton => Some(Sample::Skeleton),
            Commands::Hands => Some(Sample::Hands),
            Commands::Grab => Some(Sample::Grab),
            Commands::Version | Commands::Devices | Commands::Watch => None,
        }
    }
}

fn load_config(cli: &Cli) -> Result<VisualizerConfig> {
    let mut config = match &cli.config {
        Some(path) => VisualizerConfig::load(path)?,
        None => VisualizerConfig::default(),
    };
    if let Some(max_range) = cli.max_range {
        config.depth.max_range_mm = Some(max_range);
    }
    if let Some(devices) = cli.devices {
        config.capture.synthetic_devices = devices;
    }
    config.validate()?;
    Ok(config)
}

fn make_backend(kind: BackendKind, config: &VisualizerConfig) -> Result<Arc<dyn CaptureBackend>> {
    match kind {
        BackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::new(
            config.capture.synthetic_devices,
            SyntheticOptions::from_settings(&config.capture),
        ))),
        #[cfg(feature = "camera-nokhwa")]
        BackendKind::Webcam => Ok(Arc::new(capture::webcam::WebcamBackend)),
        #[cfg(not(feature = "camera-nokhwa"))]
        BackendKind::Webcam => bail!("built without the camera-nokhwa feature"),
    }
}

fn stop_on_ctrlc(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl+C handler")
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let backend = make_backend(cli.backend, &config)?;

    let Some(sample) = cli.command.sample() else {
        return match cli.command {
            Commands::Version => {
                samples::print_version();
                Ok(())
            }
            Commands::Devices => samples::list_devices(backend.as_ref()),
            Commands::Watch => {
                let stop = Arc::new(AtomicBool::new(false));
                stop_on_ctrlc(stop.clone())?;
                samples::watch_devices(backend, stop)
            }
            _ => Ok(()),
        };
    };

    let built = samples::build(sample, &config, backend.as_ref(), cli.frames)?;
    if built.pumps.is_empty() {
        bail!("{}: nothing to show", sample.title());
    }

    if cli.headless {
        stop_on_ctrlc(built.stop.clone())?;
        let dir = cli.snapshot_dir.clone();
        let every = config.display.snapshot_every;
        samples::run_pumps(built.pumps, || {
            Ok(Box::new(PngSink::new(dir.clone(), every)?) as Box<dyn FrameSink + Send>)
        })?;
        println!("snapshots written to {}", cli.snapshot_dir.display());
        return Ok(());
    }

    let (frame_tx, frame_rx) = bounded(VIEWER_QUEUE);
    let controls = built.pumps.iter().map(|pump| pump.control()).collect();
    let stop = built.stop.clone();
    let pumps = built.pumps;
    let runner = thread::Builder::new()
        .name("pumps".into())
        .spawn(move || {
            samples::run_pumps(pumps, || {
                Ok(Box::new(ChannelSink::new(frame_tx.clone())) as Box<dyn FrameSink + Send>)
            })
        })
        .context("failed to spawn pump runner")?;

    let setup = ui::ViewerSetup {
        title: sample.title().to_string(),
        frames: frame_rx,
        controls,
        stream_controls: sample.has_stream_controls(),
    };

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, setup) {
                eprintln!("failed to launch ui: {err:?}");
            }
        });

    stop.store(true, Ordering::SeqCst);
    match runner.join() {
        Ok(result) => result,
        Err(_) => bail!("pump runner panicked"),
    }
}
