//! The per-device frame loop: wait, take the newest frame, convert,
//! composite, present.
//!
//! A pump is single-threaded. Its only suspension point is the bounded wait
//! on the device or tracker, so a stop request takes effect within one tick.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{
    buffer::VisualBuffer,
    compositor::{Compositor, OverlayLayers},
    depth_converter::DepthConverter,
    resize::DisplayScaler,
    rgba_converter::convert_raw_frame,
    sink::{FrameSink, PresentedFrame},
};
use crate::{
    capture::{CaptureDevice, StreamHandle},
    config::CaptureSettings,
    error::{CaptureError, FrameError, PipelineError},
    tracking::{GrabDetector, SessionPlan, Tracker, tracked_hands},
    types::{CropRect, DepthFrame, RawFrame, TrackerEvent},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpCommand {
    ToggleMirroring,
    ToggleCropping,
    Stop,
}

/// Handle for stopping and steering a running pump from another thread.
#[derive(Clone, Debug)]
pub struct PumpControl {
    stop: Arc<AtomicBool>,
    commands: Sender<PumpCommand>,
}

impl PumpControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// False once the pump is gone.
    pub fn send(&self, command: PumpCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub ticks: u64,
    /// Ticks where nothing arrived within the wait timeout.
    pub timeouts: u64,
    /// Frames handed to the sink.
    pub frames: u64,
    /// Frames superseded by a newer one before they could be drawn.
    pub dropped: u64,
    pub failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpOptions {
    pub wait_timeout: Duration,
    /// 0 disables the limit.
    pub max_consecutive_failures: u32,
    pub max_frames: Option<u64>,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(100),
            max_consecutive_failures: 3,
            max_frames: None,
        }
    }
}

impl PumpOptions {
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            wait_timeout: settings.wait_timeout(),
            max_consecutive_failures: settings.max_consecutive_failures,
            max_frames: None,
        }
    }
}

/// One started stream and how it is shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamView {
    pub handle: StreamHandle,
    pub name: String,
    /// Print the distance at the image center on depth frames.
    pub center_distance: bool,
}

impl StreamView {
    pub fn new(handle: StreamHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            center_distance: false,
        }
    }

    pub fn with_center_distance(mut self) -> Self {
        self.center_distance = true;
        self
    }
}

/// Centered half-size crop.
pub fn centered_crop(width: u32, height: u32) -> CropRect {
    CropRect {
        x: width / 4,
        y: height / 4,
        width: width / 2,
        height: height / 2,
    }
}

/// Device streams read next to the tracker. The newest depth frame
/// replaces the tracker's depth on screen and goes to the grab detector
/// together with the newest color frame.
struct SessionDevice {
    device: Box<dyn CaptureDevice>,
    depth: StreamView,
    color: Option<StreamView>,
    latest_depth: Option<DepthFrame>,
    latest_color: Option<RawFrame>,
}

/// Tracker plus the collaborators that react to its frames.
pub struct TrackingSession {
    tracker: Box<dyn Tracker>,
    plan: SessionPlan,
    layers: OverlayLayers,
    view: String,
    events: Vec<Receiver<TrackerEvent>>,
    grab: Option<Box<dyn GrabDetector>>,
    device: Option<SessionDevice>,
}

impl TrackingSession {
    pub fn new(
        tracker: Box<dyn Tracker>,
        plan: SessionPlan,
        layers: OverlayLayers,
        view: impl Into<String>,
    ) -> Self {
        let events = vec![tracker.events()];
        Self {
            tracker,
            plan,
            layers,
            view: view.into(),
            events,
            grab: None,
            device: None,
        }
    }

    /// `events` is the channel the detector reports grabs on.
    pub fn with_grab_detector(
        mut self,
        detector: Box<dyn GrabDetector>,
        events: Receiver<TrackerEvent>,
    ) -> Self {
        self.grab = Some(detector);
        self.events.push(events);
        self
    }

    /// Synchronized device streams; only the depth is shown.
    pub fn with_device(
        mut self,
        device: Box<dyn CaptureDevice>,
        depth: StreamView,
        color: Option<StreamView>,
    ) -> Self {
        self.device = Some(SessionDevice {
            device,
            depth,
            color,
            latest_depth: None,
            latest_color: None,
        });
        self
    }
}

/// Newest frame of `view`, `None` if nothing new arrived.
fn read_view(
    device: &mut dyn CaptureDevice,
    view: &StreamView,
    stats: &mut PumpStats,
) -> Result<Option<RawFrame>, PipelineError> {
    match device.read_latest(view.handle)? {
        Some(latest) => {
            stats.dropped += latest.dropped;
            Ok(Some(latest.item))
        }
        None => Ok(None),
    }
}

impl SessionDevice {
    fn refresh(&mut self, stats: &mut PumpStats) -> Result<(), PipelineError> {
        if let Some(raw) = read_view(self.device.as_mut(), &self.depth, stats)? {
            self.latest_depth = Some(DepthFrame::from_raw(&raw)?);
        }
        if let Some(view) = &self.color {
            if let Some(raw) = read_view(self.device.as_mut(), view, stats)? {
                self.latest_color = Some(raw);
            }
        }
        Ok(())
    }
}

enum Source {
    Streams {
        device: Box<dyn CaptureDevice>,
        views: Vec<StreamView>,
    },
    Tracking(Box<TrackingSession>),
}

struct FailureLimit {
    consecutive: u32,
    limit: u32,
}

impl FailureLimit {
    fn failed(&mut self, stats: &mut PumpStats, err: PipelineError) -> Result<(), PipelineError> {
        if err.is_fatal() {
            return Err(err);
        }
        stats.failures += 1;
        self.consecutive += 1;
        log::warn!("skipping frame: {err}");
        if self.limit > 0 && self.consecutive >= self.limit {
            return Err(PipelineError::TooManyFailures(self.consecutive));
        }
        Ok(())
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }
}

pub struct FramePump {
    source: Source,
    converter: DepthConverter,
    compositor: Compositor,
    scaler: DisplayScaler,
    options: PumpOptions,
    state: PumpState,
    stats: PumpStats,
    failures: FailureLimit,
    control: PumpControl,
    commands: Receiver<PumpCommand>,
    mirroring: bool,
    cropping: bool,
}

impl FramePump {
    pub fn for_streams(
        device: Box<dyn CaptureDevice>,
        views: Vec<StreamView>,
        converter: DepthConverter,
        compositor: Compositor,
        scaler: DisplayScaler,
        options: PumpOptions,
    ) -> Self {
        Self::new(
            Source::Streams { device, views },
            converter,
            compositor,
            scaler,
            options,
        )
    }

    pub fn for_tracking(
        session: TrackingSession,
        converter: DepthConverter,
        compositor: Compositor,
        scaler: DisplayScaler,
        options: PumpOptions,
    ) -> Self {
        Self::new(
            Source::Tracking(Box::new(session)),
            converter,
            compositor,
            scaler,
            options,
        )
    }

    fn new(
        source: Source,
        converter: DepthConverter,
        compositor: Compositor,
        scaler: DisplayScaler,
        options: PumpOptions,
    ) -> Self {
        let (tx, commands) = unbounded();
        Self {
            source,
            converter,
            compositor,
            scaler,
            options,
            state: PumpState::Running,
            stats: PumpStats::default(),
            failures: FailureLimit {
                consecutive: 0,
                limit: options.max_consecutive_failures,
            },
            control: PumpControl {
                stop: Arc::new(AtomicBool::new(false)),
                commands: tx,
            },
            commands,
            mirroring: false,
            cropping: false,
        }
    }

    /// Shares an exit flag with other pumps or a signal handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.control.stop = stop;
        self
    }

    pub fn control(&self) -> PumpControl {
        self.control.clone()
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Runs until stopped, the frame limit is reached, the viewer goes away,
    /// or a fatal error occurs. A sink that fails to write is fatal. Streams
    /// are released in every case.
    pub fn run(&mut self, sink: &mut dyn FrameSink) -> Result<PumpStats, PipelineError> {
        if let Source::Tracking(session) = &mut self.source {
            session.plan.begin(session.tracker.as_mut());
        }
        log::info!("frame pump running");

        let result = loop {
            match self.tick(sink) {
                Ok(()) => {}
                Err(PipelineError::ViewerClosed) => {
                    log::info!("viewer closed, stopping");
                    break Ok(());
                }
                Err(err) => break Err(err),
            }
            self.handle_commands();
            if self.control.is_stopped() || self.state == PumpState::Stopped {
                break Ok(());
            }
            if let Some(max) = self.options.max_frames {
                if self.stats.frames >= max {
                    break Ok(());
                }
            }
        };

        self.shutdown();
        match result {
            Ok(()) => Ok(self.stats),
            Err(err) => {
                log::error!("frame pump failed: {err}");
                Err(err)
            }
        }
    }

    /// One wait-read-present cycle.
    pub fn tick(&mut self, sink: &mut dyn FrameSink) -> Result<(), PipelineError> {
        self.stats.ticks += 1;
        match &mut self.source {
            Source::Streams { device, views } => {
                let handles: Vec<StreamHandle> = views.iter().map(|view| view.handle).collect();
                if device
                    .wait_for_any(&handles, self.options.wait_timeout)
                    .is_none()
                {
                    self.stats.timeouts += 1;
                    return Ok(());
                }

                for view in views.iter() {
                    let raw = match device.read_latest(view.handle) {
                        Ok(Some(latest)) => {
                            self.stats.dropped += latest.dropped;
                            latest.item
                        }
                        Ok(None) => continue,
                        Err(CaptureError::Disconnected) => {
                            return Err(CaptureError::Disconnected.into());
                        }
                        Err(err) => return self.failures.failed(&mut self.stats, err.into()),
                    };

                    let buffer = match render_stream_frame(
                        &raw,
                        view,
                        &self.converter,
                        &self.compositor,
                    )
                    .and_then(|buffer| self.scaler.scale(buffer))
                    {
                        Ok(buffer) => buffer,
                        Err(err) => return self.failures.failed(&mut self.stats, err.into()),
                    };

                    sink.present(PresentedFrame {
                        view: view.name.clone(),
                        buffer,
                        caption: None,
                    })?;
                    self.stats.frames += 1;
                    self.failures.succeeded();
                }
                Ok(())
            }
            Source::Tracking(session) => {
                let Some(frame) = session.tracker.read_frame(self.options.wait_timeout) else {
                    self.stats.timeouts += 1;
                    return Ok(());
                };
                session.plan.react(session.tracker.as_mut(), &frame);

                if let Some(device) = &mut session.device {
                    match device.refresh(&mut self.stats) {
                        Ok(()) => {}
                        Err(PipelineError::Capture(CaptureError::Disconnected)) => {
                            return Err(CaptureError::Disconnected.into());
                        }
                        Err(err) => return self.failures.failed(&mut self.stats, err),
                    }
                }
                let (depth, color) = match &session.device {
                    Some(device) => (
                        device.latest_depth.as_ref().unwrap_or(&frame.depth),
                        device.latest_color.as_ref(),
                    ),
                    None => (&frame.depth, None),
                };

                if let Some(grab) = &mut session.grab {
                    for (hand, position) in tracked_hands(&frame) {
                        grab.set_hand_position(hand, position);
                        grab.update_frame(depth, color);
                    }
                }

                for events in &session.events {
                    for event in events.try_iter() {
                        if let TrackerEvent::HandLost { hand } = event {
                            log::debug!("hand {hand} lost");
                            if let Some(grab) = &mut session.grab {
                                grab.reset();
                            }
                        }
                        if let Some(caption) = event.caption() {
                            log::info!("{caption}");
                        }
                        self.compositor.note_event(&event);
                    }
                }

                let mut buffer = self.converter.convert(depth);
                let composed = self
                    .compositor
                    .compose(
                        &mut buffer,
                        &frame,
                        session.tracker.projector(),
                        session.layers,
                    )
                    .and_then(|()| self.scaler.scale(buffer));
                let buffer = match composed {
                    Ok(buffer) => buffer,
                    Err(err) => return self.failures.failed(&mut self.stats, err.into()),
                };

                sink.present(PresentedFrame {
                    view: session.view.clone(),
                    buffer,
                    caption: self.compositor.caption().map(str::to_string),
                })?;
                self.stats.frames += 1;
                self.failures.succeeded();
                Ok(())
            }
        }
    }

    fn handle_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                PumpCommand::Stop => self.state = PumpState::Stopped,
                PumpCommand::ToggleMirroring => {
                    self.mirroring = !self.mirroring;
                    let enabled = self.mirroring;
                    self.for_each_stream(|device, view| device.set_mirroring(view.handle, enabled));
                }
                PumpCommand::ToggleCropping => {
                    self.cropping = !self.cropping;
                    let enabled = self.cropping;
                    self.for_each_stream(|device, view| {
                        let crop = if enabled {
                            let mode = device.stream_info(view.handle)?.mode;
                            Some(centered_crop(mode.width, mode.height))
                        } else {
                            None
                        };
                        device.set_cropping(view.handle, crop)
                    });
                }
            }
        }
    }

    fn for_each_stream<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut dyn CaptureDevice, &StreamView) -> Result<(), CaptureError>,
    {
        let mut apply = |device: &mut Box<dyn CaptureDevice>, view: &StreamView| {
            if let Err(err) = f(device.as_mut(), view) {
                log::warn!("{}: {err}", view.name);
            }
        };
        match &mut self.source {
            Source::Streams { device, views } => {
                for view in views.iter() {
                    apply(device, view);
                }
            }
            Source::Tracking(session) => {
                if let Some(session_device) = &mut session.device {
                    let SessionDevice { device, depth, color, .. } = session_device;
                    apply(device, depth);
                    if let Some(view) = color {
                        apply(device, view);
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.state = PumpState::Stopped;
        match &mut self.source {
            Source::Streams { device, .. } => device.stop(),
            Source::Tracking(session) => {
                if let Some(session_device) = &mut session.device {
                    session_device.device.stop();
                }
            }
        }
        let stats = self.stats;
        log::info!(
            "frame pump stopped: {} frames, {} dropped, {} timeouts, {} failures",
            stats.frames,
            stats.dropped,
            stats.timeouts,
            stats.failures
        );
    }
}

fn render_stream_frame(
    raw: &RawFrame,
    view: &StreamView,
    converter: &DepthConverter,
    compositor: &Compositor,
) -> Result<VisualBuffer, FrameError> {
    if !raw.format.is_depth() {
        return convert_raw_frame(raw);
    }
    let depth = DepthFrame::from_raw(raw)?;
    let mut buffer = converter.convert(&depth);
    if view.center_distance {
        compositor.draw_center_distance(&mut buffer, &depth);
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Duration,
    };

    use super::*;
    use crate::{
        capture::{
            DeviceInfo, LatestFrame, StreamInfo,
            channel::{self, Latest, Publisher, Subscriber, latest_queue},
        },
        config::{DepthMapping, OverlayStyle, ZeroDepthPolicy},
        tracking::{SyntheticGrabDetector, SyntheticTracker, SyntheticTrackerOptions},
        types::{GestureKind, HandId, PixelFormat, Point3, StreamKind, VideoMode},
    };

    #[derive(Default)]
    struct Recorder(Vec<PresentedFrame>);

    impl FrameSink for Recorder {
        fn present(&mut self, frame: PresentedFrame) -> Result<(), PipelineError> {
            self.0.push(frame);
            Ok(())
        }
    }

    /// Fails every write with `error`.
    struct FailingSink(fn() -> PipelineError);

    impl FrameSink for FailingSink {
        fn present(&mut self, _frame: PresentedFrame) -> Result<(), PipelineError> {
            Err((self.0)())
        }
    }

    #[derive(Default)]
    struct Calls {
        mirroring: Vec<bool>,
        cropping: Vec<Option<CropRect>>,
        stopped: bool,
    }

    /// Serves scripted reads first, then whatever was published.
    struct FakeDevice {
        info: DeviceInfo,
        script: VecDeque<Result<Option<LatestFrame>, CaptureError>>,
        publisher: Option<Publisher<RawFrame>>,
        subscriber: Subscriber<RawFrame>,
        calls: Arc<Mutex<Calls>>,
    }

    impl FakeDevice {
        fn new() -> (Self, Arc<Mutex<Calls>>) {
            let (publisher, subscriber) = latest_queue(8);
            let calls = Arc::new(Mutex::new(Calls::default()));
            let device = Self {
                info: DeviceInfo {
                    uri: "fake://0".to_string(),
                    name: "Fake".to_string(),
                    vendor: "test".to_string(),
                    usb_vendor_id: 0,
                    usb_product_id: 0,
                },
                script: VecDeque::new(),
                publisher: Some(publisher),
                subscriber,
                calls: calls.clone(),
            };
            (device, calls)
        }
    }

    impl CaptureDevice for FakeDevice {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn start_stream(
            &mut self,
            _kind: StreamKind,
            _mode: VideoMode,
        ) -> Result<StreamHandle, CaptureError> {
            Ok(0)
        }

        fn stream_info(&self, _handle: StreamHandle) -> Result<StreamInfo, CaptureError> {
            let mode = VideoMode::new(640, 480, 30, PixelFormat::Depth1Mm);
            Ok(StreamInfo {
                kind: StreamKind::Depth,
                mode,
                supported_modes: vec![mode],
                min_pixel_value: 0,
                max_pixel_value: 10_000,
                horizontal_fov: 1.0,
                vertical_fov: 0.8,
                cropping_supported: true,
                mirroring: false,
                cropping: None,
                camera_settings: None,
            })
        }

        fn wait_for_any(&self, _handles: &[StreamHandle], timeout: Duration) -> Option<usize> {
            if !self.script.is_empty() {
                return Some(0);
            }
            channel::wait_for_any(&[&self.subscriber], timeout)
        }

        fn read_latest(
            &mut self,
            _handle: StreamHandle,
        ) -> Result<Option<LatestFrame>, CaptureError> {
            match self.script.pop_front() {
                Some(read) => read,
                None => self.subscriber.drain_latest(),
            }
        }

        fn set_mirroring(&mut self, _handle: StreamHandle, enabled: bool) -> Result<(), CaptureError> {
            self.calls.lock().unwrap().mirroring.push(enabled);
            Ok(())
        }

        fn set_cropping(
            &mut self,
            _handle: StreamHandle,
            crop: Option<CropRect>,
        ) -> Result<(), CaptureError> {
            self.calls.lock().unwrap().cropping.push(crop);
            Ok(())
        }

        fn set_depth_color_sync(&mut self, _enabled: bool) -> Result<(), CaptureError> {
            Ok(())
        }

        fn set_image_registration(&mut self, _enabled: bool) -> Result<(), CaptureError> {
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().stopped = true;
        }
    }

    fn depth_frame(value: u16, index: u64) -> RawFrame {
        RawFrame::from_depth_mm(4, 2, &[value; 8], index)
    }

    fn stream_pump(device: FakeDevice, options: PumpOptions) -> FramePump {
        FramePump::for_streams(
            Box::new(device),
            vec![StreamView::new(0, "Depth Stream")],
            DepthConverter::new(10_000, DepthMapping::Linear, ZeroDepthPolicy::Far),
            Compositor::new(OverlayStyle::default()),
            DisplayScaler::new(None),
            options,
        )
    }

    fn options(max_frames: Option<u64>) -> PumpOptions {
        PumpOptions {
            wait_timeout: Duration::from_millis(5),
            max_frames,
            ..PumpOptions::default()
        }
    }

    fn read_failure() -> Result<Option<LatestFrame>, CaptureError> {
        Err(CaptureError::FrameReadFailure("timeout".to_string()))
    }

    fn delivered(frame: RawFrame) -> Result<Option<LatestFrame>, CaptureError> {
        Ok(Some(Latest {
            item: frame,
            dropped: 0,
        }))
    }

    #[test]
    fn burst_draws_only_the_newest_frame() {
        let (device, _) = FakeDevice::new();
        if let Some(publisher) = &device.publisher {
            for i in 0..5u16 {
                publisher.publish(Ok(depth_frame((i + 1) * 1000, i as u64)));
            }
        }
        let mut pump = stream_pump(device, options(Some(1)));
        let mut sink = Recorder::default();
        let stats = pump.run(&mut sink).unwrap();

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.dropped, 4);
        assert_eq!(sink.0.len(), 1);
        // 5000 mm of 10 m, linear.
        assert_eq!(sink.0[0].buffer.pixel(0, 0), Some(&[128, 128, 128, 255][..]));
        assert_eq!(sink.0[0].view, "Depth Stream");
    }

    #[test]
    fn consecutive_failures_end_the_run() {
        let (mut device, calls) = FakeDevice::new();
        device.script.extend([read_failure(), read_failure(), read_failure()]);
        let mut pump = stream_pump(device, options(None));
        let mut sink = Recorder::default();

        let err = pump.run(&mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::TooManyFailures(3)));
        assert_eq!(pump.stats().failures, 3);
        assert_eq!(pump.state(), PumpState::Stopped);
        assert!(calls.lock().unwrap().stopped);
    }

    #[test]
    fn a_good_frame_resets_the_failure_run() {
        let (mut device, _) = FakeDevice::new();
        device.script.extend([
            read_failure(),
            read_failure(),
            delivered(depth_frame(100, 0)),
            read_failure(),
            read_failure(),
            delivered(depth_frame(200, 1)),
        ]);
        let mut pump = stream_pump(device, options(Some(2)));
        let stats = pump.run(&mut Recorder::default()).unwrap();
        assert_eq!(stats.failures, 4);
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let (mut device, _) = FakeDevice::new();
        let mut broken = depth_frame(100, 0);
        broken.data.pop();
        device
            .script
            .extend([delivered(broken), delivered(depth_frame(100, 1))]);
        let mut pump = stream_pump(device, options(Some(1)));
        let mut sink = Recorder::default();
        let stats = pump.run(&mut sink).unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn stop_flag_ends_the_loop_within_a_tick() {
        let (device, calls) = FakeDevice::new();
        let mut pump = stream_pump(device, options(None));
        pump.control().stop();
        let stats = pump.run(&mut Recorder::default()).unwrap();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(pump.state(), PumpState::Stopped);
        assert!(calls.lock().unwrap().stopped);
    }

    #[test]
    fn commands_toggle_stream_controls() {
        let (device, calls) = FakeDevice::new();
        let mut pump = stream_pump(device, options(None));
        let control = pump.control();
        assert!(control.send(PumpCommand::ToggleMirroring));
        assert!(control.send(PumpCommand::ToggleCropping));
        assert!(control.send(PumpCommand::ToggleCropping));
        assert!(control.send(PumpCommand::Stop));
        pump.run(&mut Recorder::default()).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.mirroring, vec![true]);
        assert_eq!(
            calls.cropping,
            vec![
                Some(CropRect {
                    x: 160,
                    y: 120,
                    width: 320,
                    height: 240
                }),
                None
            ]
        );
    }

    #[test]
    fn disconnected_stream_is_fatal() {
        let (mut device, _) = FakeDevice::new();
        if let Some(publisher) = device.publisher.take() {
            publisher.publish(Ok(depth_frame(100, 0)));
        }
        let mut pump = stream_pump(device, options(None));
        let mut sink = Recorder::default();
        let err = pump.run(&mut sink).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Capture(CaptureError::Disconnected)
        ));
        // The frame queued before the disconnect was still shown.
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn center_distance_is_printed_on_depth_views() {
        let (mut device, _) = FakeDevice::new();
        let frame = RawFrame::from_depth_mm(64, 48, &vec![900; 64 * 48], 0);
        device.script.push_back(delivered(frame));
        let mut pump = FramePump::for_streams(
            Box::new(device),
            vec![StreamView::new(0, "Depth Stream").with_center_distance()],
            DepthConverter::new(10_000, DepthMapping::Linear, ZeroDepthPolicy::Far),
            Compositor::new(OverlayStyle::default()),
            DisplayScaler::new(None),
            options(Some(1)),
        );
        let mut sink = Recorder::default();
        pump.run(&mut sink).unwrap();
        let buffer = &sink.0[0].buffer;
        let white = buffer
            .as_bytes()
            .chunks_exact(4)
            .filter(|px| px[..3] == [255, 255, 255])
            .count();
        assert!(white > 0);
    }

    fn unpaced_tracker() -> SyntheticTracker {
        SyntheticTracker::new(SyntheticTrackerOptions {
            paced: false,
            ..SyntheticTrackerOptions::default()
        })
    }

    fn tracking_pump(session: TrackingSession, frames: u64) -> FramePump {
        FramePump::for_tracking(
            session,
            DepthConverter::new(10_000, DepthMapping::Inverted, ZeroDepthPolicy::Far),
            Compositor::new(OverlayStyle::default()),
            DisplayScaler::new(None),
            options(Some(frames)),
        )
    }

    #[test]
    fn skeleton_session_tints_the_user() {
        let session = TrackingSession::new(
            Box::new(unpaced_tracker()),
            SessionPlan {
                track_skeletons: true,
                ..SessionPlan::default()
            },
            OverlayLayers {
                user_labels: true,
                skeletons: true,
                ..OverlayLayers::default()
            },
            "User Tracker",
        );
        let mut pump = tracking_pump(session, 40);
        let mut sink = Recorder::default();
        let stats = pump.run(&mut sink).unwrap();
        assert_eq!(stats.frames, 40);

        let last = &sink.0.last().unwrap().buffer;
        let red_only = last
            .as_bytes()
            .chunks_exact(4)
            .filter(|px| px[0] > 0 && px[1] == 0 && px[2] == 0)
            .count();
        assert!(red_only > 0);
    }

    #[test]
    fn grab_session_captions_grab_and_release() {
        let tracker = unpaced_tracker();
        let (grab_tx, grab_rx) = unbounded();
        let detector = SyntheticGrabDetector::new(tracker.camera(), grab_tx);
        let session = TrackingSession::new(
            Box::new(tracker),
            SessionPlan {
                gestures: vec![GestureKind::Wave],
                hands_from_gestures: true,
                ..SessionPlan::default()
            },
            OverlayLayers {
                hand_markers: true,
                caption: true,
                ..OverlayLayers::default()
            },
            "Grab Detector",
        )
        .with_grab_detector(Box::new(detector), grab_rx);

        let mut pump = tracking_pump(session, 260);
        let mut sink = Recorder::default();
        pump.run(&mut sink).unwrap();

        let captions: Vec<Option<String>> = sink.0.iter().map(|f| f.caption.clone()).collect();
        assert!(captions.contains(&Some("WAVE".to_string())));
        assert!(captions.contains(&Some("GRAB".to_string())));
        assert_eq!(captions.last(), Some(&Some("RELEASE".to_string())));
    }

    #[test]
    fn sink_write_failures_end_the_run_with_an_error() {
        let (mut device, calls) = FakeDevice::new();
        device.script.push_back(delivered(depth_frame(100, 0)));
        let mut pump = stream_pump(device, options(None));
        let mut sink = FailingSink(|| PipelineError::Sink("disk full".to_string()));

        let err = pump.run(&mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::Sink(_)));
        assert_eq!(pump.state(), PumpState::Stopped);
        assert!(calls.lock().unwrap().stopped);
    }

    #[test]
    fn closed_viewer_stops_cleanly() {
        let (mut device, calls) = FakeDevice::new();
        device.script.push_back(delivered(depth_frame(100, 0)));
        let mut pump = stream_pump(device, options(None));
        let mut sink = FailingSink(|| PipelineError::ViewerClosed);

        assert!(pump.run(&mut sink).is_ok());
        assert!(calls.lock().unwrap().stopped);
    }

    /// Records which depth frames reach the detector.
    struct RecordingDetector {
        seen: Arc<Mutex<Vec<(u64, u32)>>>,
        hand: Option<HandId>,
    }

    impl GrabDetector for RecordingDetector {
        fn set_hand_position(&mut self, hand: HandId, _position: Point3) {
            self.hand = Some(hand);
        }

        fn update_frame(&mut self, depth: &DepthFrame, _color: Option<&RawFrame>) {
            if self.hand.is_some() {
                self.seen.lock().unwrap().push((depth.index, depth.width));
            }
        }

        fn reset(&mut self) {
            self.hand = None;
        }
    }

    #[test]
    fn grab_detector_sees_the_device_depth() {
        const DEVICE_INDEX: u64 = 1000;
        let (mut device, calls) = FakeDevice::new();
        for i in 0..60u64 {
            let raw = RawFrame::from_depth_mm(8, 6, &[2000; 48], DEVICE_INDEX + i);
            device.script.push_back(delivered(raw));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = RecordingDetector {
            seen: seen.clone(),
            hand: None,
        };
        let (_grab_tx, grab_rx) = unbounded();
        let session = TrackingSession::new(
            Box::new(unpaced_tracker()),
            SessionPlan {
                gestures: vec![GestureKind::Wave],
                hands_from_gestures: true,
                ..SessionPlan::default()
            },
            OverlayLayers {
                hand_markers: true,
                caption: true,
                ..OverlayLayers::default()
            },
            "Grab Detector",
        )
        .with_grab_detector(Box::new(detector), grab_rx)
        .with_device(Box::new(device), StreamView::new(0, "Depth Stream"), None);

        let mut pump = tracking_pump(session, 60);
        let mut sink = Recorder::default();
        pump.run(&mut sink).unwrap();

        // The device frame read on a tick is the one handed over on that tick.
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        for &(index, width) in seen.iter() {
            assert!(index >= DEVICE_INDEX);
            assert_eq!(width, 8);
        }
        assert!(sink.0.iter().all(|f| f.view == "Grab Detector"));
        assert_eq!(sink.0.last().map(|f| f.buffer.width()), Some(8));
        assert!(calls.lock().unwrap().stopped);
    }
}
