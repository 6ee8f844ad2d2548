//! Depth samples to displayable intensities.

use rayon::prelude::*;

use super::buffer::{ColorModel, VisualBuffer};
use crate::{
    config::{DepthMapping, ZeroDepthPolicy},
    types::DepthFrame,
};

/// `255 - d * 255 / R` with a floor division, saturating to 0 beyond `R`.
pub fn invert_scale(depth_mm: u16, max_range_mm: u16) -> u8 {
    let range = max_range_mm.max(1) as u32;
    let scaled = depth_mm as u32 * 255 / range;
    255u32.saturating_sub(scaled) as u8
}

/// `round(d * 255 / R)` saturating at 255.
pub fn linear_scale(depth_mm: u16, max_range_mm: u16) -> u8 {
    let range = max_range_mm.max(1) as u32;
    let scaled = (depth_mm as u32 * 255 + range / 2) / range;
    scaled.min(255) as u8
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthConverter {
    pub max_range_mm: u16,
    pub mapping: DepthMapping,
    pub zero_depth: ZeroDepthPolicy,
    pub model: ColorModel,
}

impl DepthConverter {
    pub fn new(max_range_mm: u16, mapping: DepthMapping, zero_depth: ZeroDepthPolicy) -> Self {
        Self {
            max_range_mm: max_range_mm.max(1),
            mapping,
            zero_depth,
            model: ColorModel::Rgba,
        }
    }

    pub fn with_model(mut self, model: ColorModel) -> Self {
        self.model = model;
        self
    }

    pub fn intensity(&self, depth_mm: u16) -> u8 {
        match self.mapping {
            DepthMapping::Inverted => {
                if depth_mm == 0 && self.zero_depth == ZeroDepthPolicy::Far {
                    0
                } else {
                    invert_scale(depth_mm, self.max_range_mm)
                }
            }
            DepthMapping::Linear => linear_scale(depth_mm, self.max_range_mm),
        }
    }

    pub fn convert(&self, depth: &DepthFrame) -> VisualBuffer {
        let mut buffer = VisualBuffer::new(depth.width, depth.height, self.model);
        self.convert_into(depth, &mut buffer);
        buffer
    }

    /// Writes gray into every channel except alpha. The buffer must share the
    /// frame's dimensions; extra pixels on either side are left alone.
    pub fn convert_into(&self, depth: &DepthFrame, buffer: &mut VisualBuffer) {
        let channels = buffer.channels();
        let gray_channels = channels.min(3);
        buffer
            .as_bytes_mut()
            .par_chunks_exact_mut(channels)
            .zip(depth.samples.par_iter())
            .for_each(|(px, &d)| {
                let v = self.intensity(d);
                px[..gray_channels].fill(v);
            });
    }
}
