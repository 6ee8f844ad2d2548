pub mod channel;
pub mod scene;
pub mod synthetic;
pub mod watch;
#[cfg(feature = "camera-nokhwa")]
pub mod webcam;

use std::{fmt, time::Duration};

use crate::{
    error::CaptureError,
    types::{CropRect, RawFrame, StreamKind, VideoMode},
};

pub use channel::Latest;
pub use synthetic::{SyntheticBackend, SyntheticDevice, SyntheticOptions};

pub type StreamHandle = usize;
pub type LatestFrame = Latest<RawFrame>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub uri: String,
    pub name: String,
    pub vendor: String,
    pub usb_vendor_id: u16,
    pub usb_product_id: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.name, self.vendor, self.uri)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
    pub exposure: i32,
    pub gain: i32,
}

/// Static and current parameters of one started stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub mode: VideoMode,
    pub supported_modes: Vec<VideoMode>,
    pub min_pixel_value: i32,
    pub max_pixel_value: i32,
    /// Radians.
    pub horizontal_fov: f32,
    pub vertical_fov: f32,
    pub cropping_supported: bool,
    pub mirroring: bool,
    pub cropping: Option<CropRect>,
    pub camera_settings: Option<CameraSettings>,
}

impl StreamInfo {
    /// Multi-line report of the stream parameters.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Cropping support : {}\n", self.cropping_supported));
        out.push_str(&format!(
            "Horizontal FOV   : {:.4}\n",
            self.horizontal_fov
        ));
        out.push_str(&format!("Vertical FOV     : {:.4}\n", self.vertical_fov));
        out.push_str(&format!("Max Pixel Value  : {}\n", self.max_pixel_value));
        out.push_str(&format!("Min Pixel Value  : {}\n", self.min_pixel_value));
        out.push_str(&format!("Sensor Type      : {}\n", self.kind.sensor_label()));
        out.push_str("Supported VideoMode :\n");
        for mode in &self.supported_modes {
            out.push_str(&format!(" {mode}\n"));
        }
        if let Some(settings) = &self.camera_settings {
            out.push_str("CameraSettings\n");
            out.push_str(&format!(
                " Auto Exposure Enabled     : {}\n",
                settings.auto_exposure
            ));
            out.push_str(&format!(
                " Auto WhiteBalance Enabled : {}\n",
                settings.auto_white_balance
            ));
            out.push_str(&format!(" Exposure                  : {}\n", settings.exposure));
            out.push_str(&format!(" Gain                      : {}\n", settings.gain));
        }
        out
    }
}

/// One opened sensor device and the streams started on it.
pub trait CaptureDevice: Send {
    fn info(&self) -> &DeviceInfo;

    fn start_stream(
        &mut self,
        kind: StreamKind,
        mode: VideoMode,
    ) -> Result<StreamHandle, CaptureError>;

    fn stream_info(&self, handle: StreamHandle) -> Result<StreamInfo, CaptureError>;

    /// Index into `handles` of a stream with a frame ready, or `None` after
    /// `timeout`.
    fn wait_for_any(&self, handles: &[StreamHandle], timeout: Duration) -> Option<usize>;

    /// Newest queued frame; older queued frames are discarded and counted.
    fn read_latest(&mut self, handle: StreamHandle) -> Result<Option<LatestFrame>, CaptureError>;

    fn set_mirroring(&mut self, handle: StreamHandle, enabled: bool) -> Result<(), CaptureError>;

    fn set_cropping(
        &mut self,
        handle: StreamHandle,
        crop: Option<CropRect>,
    ) -> Result<(), CaptureError>;

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<(), CaptureError>;

    fn set_image_registration(&mut self, enabled: bool) -> Result<(), CaptureError>;

    /// Stops every stream; the device cannot be restarted afterwards.
    fn stop(&mut self);
}

pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>, CaptureError>;

    /// Opens the first enumerated device.
    fn open_any(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let devices = self.enumerate()?;
        let first = devices
            .first()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no device connected".into()))?;
        self.open(&first.uri)
    }
}
