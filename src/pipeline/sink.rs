//! Where composited frames go: the viewer window or PNG snapshots.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crossbeam_channel::{Sender, TrySendError};
use image::ExtendedColorType;

use super::buffer::{ColorModel, VisualBuffer};
use crate::error::PipelineError;

#[derive(Clone, Debug)]
pub struct PresentedFrame {
    /// Panel title; frames with the same view replace each other.
    pub view: String,
    pub buffer: VisualBuffer,
    pub caption: Option<String>,
}

pub trait FrameSink {
    fn present(&mut self, frame: PresentedFrame) -> Result<(), PipelineError>;
}

/// Hands frames to the viewer. A full channel means the viewer is behind and
/// the frame is dropped.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<PresentedFrame>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<PresentedFrame>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn present(&mut self, frame: PresentedFrame) -> Result<(), PipelineError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                log::debug!("viewer busy, dropping {} frame", frame.view);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::ViewerClosed),
        }
    }
}

/// Writes every `every`-th frame of each view as `<view>-<n>.png`.
pub struct PngSink {
    dir: PathBuf,
    every: u64,
    seen: HashMap<String, u64>,
    written: u64,
}

impl PngSink {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            PipelineError::Sink(format!("cannot create {}: {err}", dir.display()))
        })?;
        Ok(Self {
            dir,
            every: every.max(1),
            seen: HashMap::new(),
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn path_for(&self, view: &str, count: u64) -> PathBuf {
        let slug: String = view
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        self.dir.join(format!("{slug}-{count:05}.png"))
    }
}

fn color_type(model: ColorModel) -> ExtendedColorType {
    match model {
        ColorModel::Gray => ExtendedColorType::L8,
        ColorModel::Rgb => ExtendedColorType::Rgb8,
        ColorModel::Rgba => ExtendedColorType::Rgba8,
    }
}

impl FrameSink for PngSink {
    fn present(&mut self, frame: PresentedFrame) -> Result<(), PipelineError> {
        let count = self.seen.entry(frame.view.clone()).or_insert(0);
        let current = *count;
        *count += 1;
        if current % self.every != 0 {
            return Ok(());
        }

        let path = self.path_for(&frame.view, current);
        let buffer = &frame.buffer;
        image::save_buffer(
            &path,
            buffer.as_bytes(),
            buffer.width(),
            buffer.height(),
            color_type(buffer.model()),
        )
        .map_err(|err| PipelineError::Sink(format!("cannot write {}: {err}", path.display())))?;
        self.written += 1;
        log::debug!("wrote {}", path.display());
        Ok(())
    }
}
