//! The sample programs: which streams each one opens, what it draws, and
//! the console-only samples that never start a pump.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{RecvTimeoutError, unbounded};

use crate::{
    capture::{
        CaptureBackend, CaptureDevice, StreamHandle, synthetic::default_mode,
        watch::DeviceWatcher,
    },
    config::{DEFAULT_MAX_RANGE_MM, DepthMapping, VisualizerConfig},
    pipeline::{
        Compositor, DepthConverter, DisplayScaler, FramePump, FrameSink, OverlayLayers,
        PumpOptions, StreamView, TrackingSession,
    },
    tracking::{
        SessionPlan, SyntheticGrabDetector, SyntheticTracker, SyntheticTrackerOptions,
    },
    types::{GestureKind, StreamKind},
};

const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sample {
    Color,
    Depth,
    Ir,
    Streams,
    Multi,
    Skeleton,
    Hands,
    Grab,
}

impl Sample {
    pub fn title(&self) -> &'static str {
        match self {
            Sample::Color => "Color Stream",
            Sample::Depth => "Depth Stream",
            Sample::Ir => "IR Stream",
            Sample::Streams => "Video Stream",
            Sample::Multi => "Multi Device",
            Sample::Skeleton => "Skeleton",
            Sample::Hands => "Hand Tracker",
            Sample::Grab => "Grab Detector Sample",
        }
    }

    /// Depth shading range unless the configuration overrides it.
    pub fn max_range_mm(&self) -> u16 {
        match self {
            Sample::Depth => 1_000,
            _ => DEFAULT_MAX_RANGE_MM,
        }
    }

    /// Whether mirroring and cropping keys do anything.
    pub fn has_stream_controls(&self) -> bool {
        matches!(self, Sample::Streams)
    }
}

/// Pumps built for one sample, not yet running.
pub struct SamplePumps {
    pub pumps: Vec<FramePump>,
    pub stop: Arc<AtomicBool>,
}

fn converter(config: &VisualizerConfig, sample: Sample, mapping: DepthMapping) -> DepthConverter {
    DepthConverter::new(
        config.depth.max_range_mm.unwrap_or(sample.max_range_mm()),
        config.depth.mapping.unwrap_or(mapping),
        config.depth.zero_depth,
    )
}

fn stream_pump(
    sample: Sample,
    device: Box<dyn CaptureDevice>,
    views: Vec<StreamView>,
    config: &VisualizerConfig,
    options: PumpOptions,
) -> FramePump {
    FramePump::for_streams(
        device,
        views,
        converter(config, sample, DepthMapping::Linear),
        Compositor::new(config.overlay.clone()),
        DisplayScaler::new(config.display.target_size),
        options,
    )
}

fn start(
    device: &mut dyn CaptureDevice,
    kind: StreamKind,
    vga: bool,
) -> Result<StreamHandle> {
    let mode = default_mode(kind, vga);
    device
        .start_stream(kind, mode)
        .with_context(|| format!("{}: cannot start {kind} stream", device.info().uri))
}

/// Starts `kinds` on `device` and names each view, optionally suffixed.
fn start_views(
    device: &mut dyn CaptureDevice,
    kinds: &[StreamKind],
    suffix: Option<&str>,
) -> Result<Vec<StreamView>> {
    let mut views = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let handle = start(device, kind, false)?;
        let name = match suffix {
            Some(suffix) => format!("{} {suffix}", kind.view_name()),
            None => kind.view_name().to_string(),
        };
        views.push(StreamView::new(handle, name));
    }
    Ok(views)
}

/// `mirrored` follows the device the tracker shares a view with.
fn tracker(config: &VisualizerConfig, vga: bool, mirrored: bool) -> SyntheticTracker {
    let (width, height) = if vga { (640, 480) } else { (320, 240) };
    SyntheticTracker::new(SyntheticTrackerOptions {
        width,
        height,
        fps: config.capture.fps,
        paced: true,
        mirrored,
    })
}

fn tracking_pump(
    sample: Sample,
    session: TrackingSession,
    config: &VisualizerConfig,
    options: PumpOptions,
) -> FramePump {
    FramePump::for_tracking(
        session,
        converter(config, sample, DepthMapping::Inverted),
        Compositor::new(config.overlay.clone()),
        DisplayScaler::new(config.display.target_size),
        options,
    )
}

/// Opens devices and streams for `sample` and wires up its pumps.
pub fn build(
    sample: Sample,
    config: &VisualizerConfig,
    backend: &dyn CaptureBackend,
    max_frames: Option<u64>,
) -> Result<SamplePumps> {
    let options = PumpOptions {
        max_frames,
        ..PumpOptions::from_settings(&config.capture)
    };
    log::info!("starting {} with the {} backend", sample.title(), backend.name());

    let pumps = match sample {
        Sample::Color | Sample::Depth | Sample::Ir | Sample::Streams => {
            let mut device = backend.open_any().context("no device to open")?;
            log::info!("opened {}", device.info());
            let kinds: &[StreamKind] = match sample {
                Sample::Color => &[StreamKind::Color],
                Sample::Ir => &[StreamKind::Ir, StreamKind::Depth],
                _ => &[StreamKind::Color, StreamKind::Depth],
            };
            let mut views = start_views(device.as_mut(), kinds, None)?;
            if sample == Sample::Depth {
                views = views
                    .into_iter()
                    .map(|view| {
                        if view.name == StreamKind::Depth.view_name() {
                            view.with_center_distance()
                        } else {
                            view
                        }
                    })
                    .collect();
            }
            if sample == Sample::Streams {
                for view in &views {
                    let info = device.stream_info(view.handle)?;
                    println!("{}", view.name);
                    print!("{}", info.describe());
                }
            }
            vec![stream_pump(sample, device, views, config, options)]
        }
        Sample::Multi => {
            let devices = backend.enumerate()?;
            println!("Connected device count : {}", devices.len());
            let mut pumps = Vec::with_capacity(devices.len());
            for info in &devices {
                println!("{}, {}, {}", info.name, info.vendor, info.uri);
                let mut device = backend
                    .open(&info.uri)
                    .with_context(|| format!("cannot open {}", info.uri))?;
                let views = start_views(
                    device.as_mut(),
                    &[StreamKind::Color, StreamKind::Depth],
                    Some(&info.uri),
                )?;
                pumps.push(stream_pump(sample, device, views, config, options));
            }
            if pumps.is_empty() {
                return Err(anyhow!("no device connected"));
            }
            pumps
        }
        Sample::Skeleton => {
            let session = TrackingSession::new(
                Box::new(tracker(config, false, false)),
                SessionPlan {
                    track_skeletons: true,
                    ..SessionPlan::default()
                },
                OverlayLayers {
                    user_labels: true,
                    skeletons: true,
                    ..OverlayLayers::default()
                },
                sample.title(),
            );
            vec![tracking_pump(sample, session, config, options)]
        }
        Sample::Hands => {
            let session = TrackingSession::new(
                Box::new(tracker(config, false, false)),
                SessionPlan {
                    gestures: vec![GestureKind::Wave, GestureKind::Click],
                    hands_from_gestures: true,
                    ..SessionPlan::default()
                },
                OverlayLayers {
                    hand_trails: true,
                    caption: true,
                    ..OverlayLayers::default()
                },
                sample.title(),
            );
            vec![tracking_pump(sample, session, config, options)]
        }
        Sample::Grab => {
            let mut device = backend.open_any().context("no device to open")?;
            log::info!("opened {}", device.info());
            let color = start(device.as_mut(), StreamKind::Color, true)?;
            let depth = start(device.as_mut(), StreamKind::Depth, true)?;
            device
                .set_depth_color_sync(true)
                .context("depth/color sync")?;
            device
                .set_image_registration(true)
                .context("image registration")?;
            for handle in [color, depth] {
                device.set_mirroring(handle, true)?;
            }

            let tracker = tracker(config, true, true);
            let (grab_tx, grab_rx) = unbounded();
            let detector = SyntheticGrabDetector::new(tracker.camera(), grab_tx);
            let session = TrackingSession::new(
                Box::new(tracker),
                SessionPlan {
                    gestures: vec![GestureKind::Wave, GestureKind::Click],
                    hands_from_gestures: true,
                    ..SessionPlan::default()
                },
                OverlayLayers {
                    hand_markers: true,
                    caption: true,
                    ..OverlayLayers::default()
                },
                sample.title(),
            )
            .with_grab_detector(Box::new(detector), grab_rx)
            .with_device(
                device,
                StreamView::new(depth, StreamKind::Depth.view_name()),
                Some(StreamView::new(color, StreamKind::Color.view_name())),
            );
            vec![tracking_pump(sample, session, config, options)]
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let pumps = pumps
        .into_iter()
        .map(|pump| pump.with_stop_flag(stop.clone()))
        .collect();
    Ok(SamplePumps { pumps, stop })
}

/// Runs every pump on its own thread until all of them finish. A failing
/// pump raises the shared stop flag, so one failed device ends the sample;
/// the first failure is returned after the others have stopped.
pub fn run_pumps<F>(pumps: Vec<FramePump>, mut make_sink: F) -> Result<()>
where
    F: FnMut() -> Result<Box<dyn FrameSink + Send>>,
{
    let mut handles = Vec::with_capacity(pumps.len());
    for (index, mut pump) in pumps.into_iter().enumerate() {
        let mut sink = make_sink()?;
        let control = pump.control();
        let handle = thread::Builder::new()
            .name(format!("pump-{index}"))
            .spawn(move || {
                let result = pump.run(sink.as_mut());
                if result.is_err() {
                    pump.control().stop();
                }
                result
            })
            .context("failed to spawn pump thread")?;
        handles.push((handle, control));
    }

    let mut first_error = None;
    for (handle, control) in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow!("pump thread panicked"))
            .and_then(|result| result.map_err(anyhow::Error::from));
        match outcome {
            Ok(stats) => log::debug!("pump finished: {stats:?}"),
            Err(err) => {
                // One failed device ends the sample.
                control.stop();
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

pub fn print_version() {
    println!(
        "{} version : {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
}

pub fn list_devices(backend: &dyn CaptureBackend) -> Result<()> {
    let devices = backend.enumerate()?;
    println!("Connected device count : {}", devices.len());
    for info in devices {
        println!("{}, {}, {}", info.name, info.vendor, info.uri);
    }
    Ok(())
}

/// Prints connect and disconnect events until `stop` is set.
pub fn watch_devices(backend: Arc<dyn CaptureBackend>, stop: Arc<AtomicBool>) -> Result<()> {
    let (watcher, events) = DeviceWatcher::spawn(backend, WATCH_INTERVAL)?;
    println!("Watching for devices, press Ctrl+C to stop");
    while !stop.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => println!("{}", event.describe()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(watcher);
    Ok(())
}
