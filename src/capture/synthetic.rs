//! A depth camera that renders the animated test scene instead of reading a
//! sensor. Each started stream gets its own producer thread.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use rayon::prelude::*;

use super::{
    CameraSettings, CaptureBackend, CaptureDevice, DeviceInfo, LatestFrame, StreamHandle,
    StreamInfo,
    channel::{self, Producer, Publisher, Subscriber, latest_queue},
    scene::{DEPTH_HFOV, DEPTH_VFOV, SceneState},
};
use crate::{
    config::CaptureSettings,
    error::CaptureError,
    types::{CropRect, PixelFormat, RawFrame, StreamKind, VideoMode},
};

const URI_SCHEME: &str = "synthetic://";
const MAX_DEPTH_MM: i32 = 10_000;
const MAX_IR_VALUE: i32 = 1023;
const STOP_POLL: Duration = Duration::from_millis(5);

const DEPTH_MODES: &[VideoMode] = &[
    VideoMode::new(320, 240, 30, PixelFormat::Depth1Mm),
    VideoMode::new(640, 480, 30, PixelFormat::Depth1Mm),
    VideoMode::new(640, 480, 30, PixelFormat::Depth100Um),
];
const COLOR_MODES: &[VideoMode] = &[
    VideoMode::new(320, 240, 30, PixelFormat::Rgb888),
    VideoMode::new(640, 480, 30, PixelFormat::Rgb888),
];
const IR_MODES: &[VideoMode] = &[
    VideoMode::new(320, 240, 30, PixelFormat::Gray16),
    VideoMode::new(640, 480, 30, PixelFormat::Gray16),
];

pub fn supported_modes(kind: StreamKind) -> &'static [VideoMode] {
    match kind {
        StreamKind::Depth => DEPTH_MODES,
        StreamKind::Color => COLOR_MODES,
        StreamKind::Ir => IR_MODES,
    }
}

/// Default mode of each stream kind at the requested resolution.
pub fn default_mode(kind: StreamKind, vga: bool) -> VideoMode {
    let modes = supported_modes(kind);
    let idx = if vga { 1 } else { 0 };
    modes[idx.min(modes.len() - 1)]
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticOptions {
    pub queue_depth: usize,
    /// Every n-th frame is reported as a read failure.
    pub fail_every: Option<u64>,
    /// Producers end after this many frames, disconnecting their stream.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            queue_depth: 1,
            fail_every: None,
            frame_limit: None,
        }
    }
}

impl SyntheticOptions {
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            queue_depth: settings.queue_depth,
            ..Self::default()
        }
    }
}

pub struct SyntheticBackend {
    devices: usize,
    options: SyntheticOptions,
}

impl SyntheticBackend {
    pub fn new(devices: usize, options: SyntheticOptions) -> Self {
        Self { devices, options }
    }
}

fn device_info(index: usize) -> DeviceInfo {
    DeviceInfo {
        uri: format!("{URI_SCHEME}{index}"),
        name: "Synthetic Depth Camera".to_string(),
        vendor: "depth-universe".to_string(),
        usb_vendor_id: 0x1d27,
        usb_product_id: 0x0600 + index as u16,
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok((0..self.devices).map(device_info).collect())
    }

    fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let index = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|rest| rest.parse::<usize>().ok())
            .filter(|&index| index < self.devices)
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no device at {uri}")))?;
        Ok(Box::new(SyntheticDevice::new(
            device_info(index),
            self.options.clone(),
        )))
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct StreamControls {
    mirroring: bool,
    cropping: Option<CropRect>,
}

struct SyntheticStream {
    kind: StreamKind,
    mode: VideoMode,
    subscriber: Subscriber<RawFrame>,
    producer: Producer,
    controls: Arc<Mutex<StreamControls>>,
}

impl SyntheticStream {
    fn controls(&self) -> StreamControls {
        read_controls(&self.controls)
    }

    fn update_controls(&self, f: impl FnOnce(&mut StreamControls)) {
        let mut guard = self
            .controls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

fn read_controls(controls: &Mutex<StreamControls>) -> StreamControls {
    *controls
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SyntheticDevice {
    info: DeviceInfo,
    options: SyntheticOptions,
    streams: Vec<SyntheticStream>,
    depth_color_sync: bool,
    image_registration: bool,
    stopped: bool,
}

impl SyntheticDevice {
    pub fn new(info: DeviceInfo, options: SyntheticOptions) -> Self {
        Self {
            info,
            options,
            streams: Vec::new(),
            depth_color_sync: false,
            image_registration: false,
            stopped: false,
        }
    }

    pub fn depth_color_sync(&self) -> bool {
        self.depth_color_sync
    }

    pub fn image_registration(&self) -> bool {
        self.image_registration
    }

    fn stream(&self, handle: StreamHandle) -> Result<&SyntheticStream, CaptureError> {
        self.streams
            .get(handle)
            .ok_or(CaptureError::UnknownStream(handle))
    }
}

impl CaptureDevice for SyntheticDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(
        &mut self,
        kind: StreamKind,
        mode: VideoMode,
    ) -> Result<StreamHandle, CaptureError> {
        if self.stopped {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} has been stopped",
                self.info.uri
            )));
        }
        if !supported_modes(kind).contains(&mode) {
            return Err(CaptureError::StreamStartFailure {
                kind,
                reason: format!("video mode {mode} is not supported"),
            });
        }

        let (publisher, subscriber) = latest_queue(self.options.queue_depth);
        let controls = Arc::new(Mutex::new(StreamControls::default()));
        let producer_controls = controls.clone();
        let options = self.options.clone();
        let producer = Producer::spawn(format!("{}-{kind}", self.info.uri), move |stop| {
            run_producer(kind, mode, options, publisher, producer_controls, stop)
        })
        .map_err(|err| CaptureError::StreamStartFailure {
            kind,
            reason: err.to_string(),
        })?;

        log::info!("{}: started {kind} stream {mode}", self.info.uri);
        self.streams.push(SyntheticStream {
            kind,
            mode,
            subscriber,
            producer,
            controls,
        });
        Ok(self.streams.len() - 1)
    }

    fn stream_info(&self, handle: StreamHandle) -> Result<StreamInfo, CaptureError> {
        let stream = self.stream(handle)?;
        let controls = stream.controls();
        let (min_pixel_value, max_pixel_value) = match stream.kind {
            StreamKind::Depth => (0, MAX_DEPTH_MM),
            StreamKind::Color => (0, 255),
            StreamKind::Ir => (0, MAX_IR_VALUE),
        };
        let camera_settings = (stream.kind == StreamKind::Color).then_some(CameraSettings {
            auto_exposure: true,
            auto_white_balance: true,
            exposure: 0,
            gain: 100,
        });
        Ok(StreamInfo {
            kind: stream.kind,
            mode: stream.mode,
            supported_modes: supported_modes(stream.kind).to_vec(),
            min_pixel_value,
            max_pixel_value,
            horizontal_fov: DEPTH_HFOV,
            vertical_fov: DEPTH_VFOV,
            cropping_supported: true,
            mirroring: controls.mirroring,
            cropping: controls.cropping,
            camera_settings,
        })
    }

    fn wait_for_any(&self, handles: &[StreamHandle], timeout: Duration) -> Option<usize> {
        let known: Vec<(usize, &Subscriber<RawFrame>)> = handles
            .iter()
            .enumerate()
            .filter_map(|(pos, &handle)| {
                self.streams
                    .get(handle)
                    .map(|stream| (pos, &stream.subscriber))
            })
            .collect();
        let subscribers: Vec<&Subscriber<RawFrame>> = known.iter().map(|(_, s)| *s).collect();
        let ready = channel::wait_for_any(&subscribers, timeout)?;
        known.get(ready).map(|(pos, _)| *pos)
    }

    fn read_latest(&mut self, handle: StreamHandle) -> Result<Option<LatestFrame>, CaptureError> {
        self.stream(handle)?.subscriber.drain_latest()
    }

    fn set_mirroring(&mut self, handle: StreamHandle, enabled: bool) -> Result<(), CaptureError> {
        let stream = self.stream(handle)?;
        stream.update_controls(|controls| controls.mirroring = enabled);
        log::info!("{} stream mirroring {}", stream.kind, on_off(enabled));
        Ok(())
    }

    fn set_cropping(
        &mut self,
        handle: StreamHandle,
        crop: Option<CropRect>,
    ) -> Result<(), CaptureError> {
        let stream = self.stream(handle)?;
        if let Some(rect) = crop {
            let fits = rect.width > 0
                && rect.height > 0
                && rect.x + rect.width <= stream.mode.width
                && rect.y + rect.height <= stream.mode.height;
            if !fits {
                return Err(CaptureError::Unsupported("cropping outside the frame"));
            }
        }
        stream.update_controls(|controls| controls.cropping = crop);
        match crop {
            Some(rect) => log::info!(
                "{} stream cropping x: {} y: {} width: {} height: {}",
                stream.kind,
                rect.x,
                rect.y,
                rect.width,
                rect.height
            ),
            None => log::info!("{} stream cropping reset", stream.kind),
        }
        Ok(())
    }

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<(), CaptureError> {
        // Every stream derives its timestamp from the frame index, so depth
        // and color frames with the same index already line up.
        self.depth_color_sync = enabled;
        log::info!("{}: depth/color sync {}", self.info.uri, on_off(enabled));
        Ok(())
    }

    fn set_image_registration(&mut self, enabled: bool) -> Result<(), CaptureError> {
        self.image_registration = enabled;
        log::info!(
            "{}: depth-to-color registration {}",
            self.info.uri,
            on_off(enabled)
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        for stream in &mut self.streams {
            stream.producer.stop();
        }
        self.stopped = true;
        log::info!("{}: all streams stopped", self.info.uri);
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn run_producer(
    kind: StreamKind,
    mode: VideoMode,
    options: SyntheticOptions,
    publisher: Publisher<RawFrame>,
    controls: Arc<Mutex<StreamControls>>,
    stop: Arc<AtomicBool>,
) {
    let interval = Duration::from_secs_f64(1.0 / mode.fps.max(1) as f64);
    let start = Instant::now();
    let mut index = 0u64;

    while !stop.load(Ordering::Relaxed) {
        if options.frame_limit.is_some_and(|limit| index >= limit) {
            break;
        }

        let failed = options
            .fail_every
            .is_some_and(|every| every > 0 && index % every == every - 1);
        let item = if failed {
            Err(CaptureError::FrameReadFailure(format!(
                "{kind} frame {index} was not delivered"
            )))
        } else {
            Ok(render_frame(kind, mode, index, read_controls(&controls)))
        };
        publisher.publish(item);
        index += 1;

        let due = start + interval.mul_f64(index as f64);
        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= due {
                break;
            }
            thread::sleep((due - now).min(STOP_POLL));
        }
    }
}

fn render_frame(kind: StreamKind, mode: VideoMode, index: u64, controls: StreamControls) -> RawFrame {
    let interval = Duration::from_secs_f64(1.0 / mode.fps.max(1) as f64);
    let state = SceneState::at(index as f32 / mode.fps.max(1) as f32);
    let (width, height) = (mode.width, mode.height);

    let (bytes_per_pixel, mut data) = match kind {
        StreamKind::Depth => {
            let scale = if mode.format == PixelFormat::Depth100Um { 10 } else { 1 };
            let samples = state.render_depth(width, height);
            (2, pack_u16(&samples, scale))
        }
        StreamKind::Color => (3, state.render_rgb(width, height)),
        StreamKind::Ir => (2, pack_u16(&state.render_ir(width, height), 1)),
    };

    if controls.mirroring {
        mirror_rows(&mut data, width as usize, bytes_per_pixel);
    }

    let (width, height, data) = match controls.cropping {
        Some(rect) => (
            rect.width,
            rect.height,
            crop(&data, width as usize, bytes_per_pixel, rect),
        ),
        None => (width, height, data),
    };

    RawFrame {
        kind,
        width,
        height,
        format: mode.format,
        data,
        timestamp: interval.mul_f64(index as f64),
        index,
    }
}

fn pack_u16(samples: &[u16], scale: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.saturating_mul(scale).to_le_bytes());
    }
    data
}

fn mirror_rows(data: &mut [u8], width: usize, bytes_per_pixel: usize) {
    let row_len = width * bytes_per_pixel;
    if row_len == 0 {
        return;
    }
    data.par_chunks_exact_mut(row_len).for_each(|row| {
        for x in 0..width / 2 {
            let mirrored = width - 1 - x;
            for b in 0..bytes_per_pixel {
                row.swap(x * bytes_per_pixel + b, mirrored * bytes_per_pixel + b);
            }
        }
    });
}

fn crop(data: &[u8], width: usize, bytes_per_pixel: usize, rect: CropRect) -> Vec<u8> {
    let row_len = width * bytes_per_pixel;
    let crop_len = rect.width as usize * bytes_per_pixel;
    let mut out = Vec::with_capacity(crop_len * rect.height as usize);
    for y in rect.y as usize..(rect.y + rect.height) as usize {
        let start = y * row_len + rect.x as usize * bytes_per_pixel;
        if let Some(row) = data.get(start..start + crop_len) {
            out.extend_from_slice(row);
        }
    }
    out
}
