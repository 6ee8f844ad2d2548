use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use super::RenderImage;
use crate::pipeline::{ColorModel, PresentedFrame, VisualBuffer};

const FPS_WINDOW: Duration = Duration::from_secs(1);

pub(super) fn frame_to_image(buffer: &VisualBuffer) -> Option<Arc<RenderImage>> {
    let mut bgra = match buffer.model() {
        ColorModel::Rgba => buffer.as_bytes().to_vec(),
        _ => buffer.to_rgba().into_bytes(),
    };

    // GPUI expects BGRA; convert in place to avoid the async asset pipeline and flicker.
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(buffer.width(), buffer.height(), bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(image)])))
}

/// Newest frame of each view in order of first appearance, plus the newest
/// caption. Older frames of a view are dropped before any image is built.
pub(super) fn latest_per_view(
    frames: impl IntoIterator<Item = PresentedFrame>,
) -> (Vec<PresentedFrame>, Option<String>) {
    let mut newest: Vec<PresentedFrame> = Vec::new();
    let mut caption = None;
    for frame in frames {
        if frame.caption.is_some() {
            caption = frame.caption.clone();
        }
        match newest.iter_mut().find(|f| f.view == frame.view) {
            Some(slot) => *slot = frame,
            None => newest.push(frame),
        }
    }
    (newest, caption)
}

/// Frames per second over roughly the last second.
pub(super) struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    pub(super) fn tick(&mut self, now: Instant) {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            self.frames = 0;
            self.window_start = now;
        }
    }

    pub(super) fn fps(&self) -> f32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presented(view: &str, width: u32, caption: Option<&str>) -> PresentedFrame {
        PresentedFrame {
            view: view.to_string(),
            buffer: VisualBuffer::new(width, 1, ColorModel::Rgba),
            caption: caption.map(str::to_string),
        }
    }

    #[test]
    fn only_the_newest_frame_of_each_view_is_kept() {
        let (frames, caption) = latest_per_view([
            presented("Depth Stream", 1, None),
            presented("Color Stream", 2, None),
            presented("Depth Stream", 3, Some("GRAB")),
            presented("Depth Stream", 4, None),
        ]);
        let kept: Vec<(&str, u32)> = frames
            .iter()
            .map(|f| (f.view.as_str(), f.buffer.width()))
            .collect();
        assert_eq!(kept, vec![("Depth Stream", 4), ("Color Stream", 2)]);
        assert_eq!(caption.as_deref(), Some("GRAB"));
    }

    #[test]
    fn an_empty_drain_keeps_nothing() {
        let (frames, caption) = latest_per_view(Vec::new());
        assert!(frames.is_empty());
        assert!(caption.is_none());
    }

    #[test]
    fn fps_settles_after_a_window() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        for i in 1..=30u64 {
            counter.tick(start + Duration::from_millis(i * 1000 / 30));
        }
        assert!((counter.fps() - 30.0).abs() < 0.5, "{}", counter.fps());
    }

    #[test]
    fn fps_is_zero_before_the_first_window() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        counter.tick(start + Duration::from_millis(100));
        assert_eq!(counter.fps(), 0.0);
    }
}
