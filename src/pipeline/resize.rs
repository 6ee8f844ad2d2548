use fast_image_resize as fir;

use super::buffer::{ColorModel, VisualBuffer};
use crate::error::FrameError;

/// Stretches composited frames to a fixed presentation size.
pub struct DisplayScaler {
    target: Option<(u32, u32)>,
    resizer: fir::Resizer,
}

impl DisplayScaler {
    pub fn new(target: Option<(u32, u32)>) -> Self {
        Self {
            target: target.filter(|&(w, h)| w > 0 && h > 0),
            resizer: fir::Resizer::new(),
        }
    }

    pub fn target(&self) -> Option<(u32, u32)> {
        self.target
    }

    /// Returns an RGBA buffer of the target size, or the input expanded to
    /// RGBA when no target is set or it already matches.
    pub fn scale(&mut self, buffer: VisualBuffer) -> Result<VisualBuffer, FrameError> {
        let rgba = match buffer.model() {
            ColorModel::Rgba => buffer,
            _ => buffer.to_rgba(),
        };
        let Some((target_w, target_h)) = self.target else {
            return Ok(rgba);
        };
        if (rgba.width(), rgba.height()) == (target_w, target_h)
            || rgba.width() == 0
            || rgba.height() == 0
        {
            return Ok(rgba);
        }

        let (width, height) = (rgba.width(), rgba.height());
        let src_image =
            fir::images::Image::from_vec_u8(width, height, rgba.into_bytes(), fir::PixelType::U8x4)
                .map_err(|err| FrameError::Resize(err.to_string()))?;
        let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
        let resize_options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
        self.resizer
            .resize(&src_image, &mut dst_image, Some(&resize_options))
            .map_err(|err| FrameError::Resize(err.to_string()))?;

        VisualBuffer::from_raw(target_w, target_h, ColorModel::Rgba, dst_image.into_vec())
    }
}
