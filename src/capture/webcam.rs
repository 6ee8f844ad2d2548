//! Color-only device over an ordinary webcam.

use std::{
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{
    CaptureBackend, CaptureDevice, DeviceInfo, LatestFrame, StreamHandle, StreamInfo,
    channel::{self, Producer, Subscriber, latest_queue},
};
use crate::{
    error::CaptureError,
    types::{CropRect, PixelFormat, RawFrame, StreamKind, VideoMode},
};

const URI_SCHEME: &str = "webcam://";

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode, but prefer higher FPS to
        // avoid very low default rates (e.g. 15 FPS) that some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn pixel_format(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::YUYV => PixelFormat::Yuyv,
        FrameFormat::MJPEG => PixelFormat::Jpeg,
        FrameFormat::RAWRGB => PixelFormat::Rgb888,
        FrameFormat::RAWBGR => PixelFormat::Bgr888,
        FrameFormat::GRAY => PixelFormat::Gray8,
    }
}

fn parse_index(uri: &str) -> Option<CameraIndex> {
    let rest = uri.strip_prefix(URI_SCHEME)?;
    Some(match rest.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(rest.to_string()),
    })
}

fn device_info(info: &CameraInfo) -> DeviceInfo {
    DeviceInfo {
        uri: format!("{URI_SCHEME}{}", info.index()),
        name: info.human_name(),
        vendor: info.description().to_string(),
        usb_vendor_id: 0,
        usb_product_id: 0,
    }
}

fn build_camera(index: &CameraIndex) -> Result<Camera, CaptureError> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.to_string()),
            },
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(CaptureError::StreamStartFailure {
        kind: StreamKind::Color,
        reason: last_err
            .unwrap_or_else(|| "failed to open camera with any supported format".to_string()),
    })
}

pub struct WebcamBackend;

impl CaptureBackend for WebcamBackend {
    fn name(&self) -> &'static str {
        "webcam"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let cameras =
            query(ApiBackend::Auto).map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?;
        Ok(cameras.iter().map(device_info).collect())
    }

    fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let index = parse_index(uri)
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("not a webcam uri: {uri}")))?;
        let info = self
            .enumerate()?
            .into_iter()
            .find(|device| device.uri == uri)
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no camera at {uri}")))?;
        Ok(Box::new(WebcamDevice {
            info,
            index,
            stream: None,
        }))
    }
}

struct WebcamStream {
    mode: VideoMode,
    subscriber: Subscriber<RawFrame>,
    producer: Producer,
}

pub struct WebcamDevice {
    info: DeviceInfo,
    index: CameraIndex,
    stream: Option<WebcamStream>,
}

impl WebcamDevice {
    fn stream(&self, handle: StreamHandle) -> Result<&WebcamStream, CaptureError> {
        match (&self.stream, handle) {
            (Some(stream), 0) => Ok(stream),
            _ => Err(CaptureError::UnknownStream(handle)),
        }
    }
}

fn to_raw_frame(frame: &Buffer, index: u64, started: Instant) -> RawFrame {
    let resolution = frame.resolution();
    RawFrame {
        kind: StreamKind::Color,
        width: resolution.width_x,
        height: resolution.height_y,
        format: pixel_format(frame.source_frame_format()),
        data: frame.buffer().to_vec(),
        timestamp: started.elapsed(),
        index,
    }
}

impl CaptureDevice for WebcamDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(
        &mut self,
        kind: StreamKind,
        mode: VideoMode,
    ) -> Result<StreamHandle, CaptureError> {
        if kind != StreamKind::Color {
            return Err(CaptureError::StreamStartFailure {
                kind,
                reason: "a webcam only has a color sensor".to_string(),
            });
        }
        if self.stream.is_some() {
            return Err(CaptureError::StreamStartFailure {
                kind,
                reason: "color stream already running".to_string(),
            });
        }

        // Fail fast before spawning the capture thread.
        let probe = build_camera(&self.index)?;
        let format = probe.camera_format();
        drop(probe);
        let actual = VideoMode::new(
            format.width(),
            format.height(),
            format.frame_rate(),
            pixel_format(format.format()),
        );
        if actual != mode {
            log::info!("{}: requested {mode}, camera delivers {actual}", self.info.uri);
        }

        let (publisher, subscriber) = latest_queue(1);
        let index = self.index.clone();
        let producer = Producer::spawn(format!("{}-color", self.info.uri), move |stop| {
            let mut camera = match build_camera(&index) {
                Ok(camera) => camera,
                Err(err) => {
                    log::error!("failed to open camera: {err}");
                    publisher.publish(Err(err));
                    return;
                }
            };

            let started = Instant::now();
            let mut frame_index = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let item = match camera.frame() {
                    Ok(frame) => Ok(to_raw_frame(&frame, frame_index, started)),
                    Err(err) => Err(CaptureError::FrameReadFailure(format!(
                        "camera frame read failed after {:?}: {err}",
                        frame_start.elapsed()
                    ))),
                };
                publisher.publish(item);
                frame_index += 1;
            }
            let _ = camera.stop_stream();
        })?;

        self.stream = Some(WebcamStream {
            mode: actual,
            subscriber,
            producer,
        });
        Ok(0)
    }

    fn stream_info(&self, handle: StreamHandle) -> Result<StreamInfo, CaptureError> {
        let stream = self.stream(handle)?;
        Ok(StreamInfo {
            kind: StreamKind::Color,
            mode: stream.mode,
            supported_modes: vec![stream.mode],
            min_pixel_value: 0,
            max_pixel_value: 255,
            // Not reported by webcam drivers.
            horizontal_fov: 0.0,
            vertical_fov: 0.0,
            cropping_supported: false,
            mirroring: false,
            cropping: None,
            camera_settings: None,
        })
    }

    fn wait_for_any(&self, handles: &[StreamHandle], timeout: Duration) -> Option<usize> {
        let pos = handles.iter().position(|&handle| handle == 0);
        match (pos, &self.stream) {
            (Some(pos), Some(stream)) => {
                channel::wait_for_any(&[&stream.subscriber], timeout).map(|_| pos)
            }
            _ => {
                std::thread::sleep(timeout);
                None
            }
        }
    }

    fn read_latest(&mut self, handle: StreamHandle) -> Result<Option<LatestFrame>, CaptureError> {
        self.stream(handle)?.subscriber.drain_latest()
    }

    fn set_mirroring(&mut self, handle: StreamHandle, _enabled: bool) -> Result<(), CaptureError> {
        self.stream(handle)?;
        Err(CaptureError::Unsupported("mirroring"))
    }

    fn set_cropping(
        &mut self,
        handle: StreamHandle,
        _crop: Option<CropRect>,
    ) -> Result<(), CaptureError> {
        self.stream(handle)?;
        Err(CaptureError::Unsupported("cropping"))
    }

    fn set_depth_color_sync(&mut self, _enabled: bool) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("depth/color sync"))
    }

    fn set_image_registration(&mut self, _enabled: bool) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("image registration"))
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.producer.stop();
            log::info!("{}: color stream stopped", self.info.uri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trip() {
        assert!(matches!(
            parse_index("webcam://2"),
            Some(CameraIndex::Index(2))
        ));
        assert!(matches!(
            parse_index("webcam:///dev/video0"),
            Some(CameraIndex::String(ref path)) if path == "/dev/video0"
        ));
        assert!(parse_index("synthetic://0").is_none());
    }

    #[test]
    fn frame_formats_map_to_pixel_formats() {
        assert_eq!(pixel_format(FrameFormat::MJPEG), PixelFormat::Jpeg);
        assert_eq!(pixel_format(FrameFormat::RAWBGR), PixelFormat::Bgr888);
        assert_eq!(pixel_format(FrameFormat::GRAY), PixelFormat::Gray8);
    }
}
