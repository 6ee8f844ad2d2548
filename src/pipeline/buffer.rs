use crate::error::FrameError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorModel {
    Gray,
    Rgb,
    Rgba,
}

impl ColorModel {
    pub const fn channels(&self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Rgba => 4,
        }
    }
}

/// Displayable pixels derived from one sensor frame.
#[derive(Clone, Debug, PartialEq)]
pub struct VisualBuffer {
    width: u32,
    height: u32,
    model: ColorModel,
    data: Vec<u8>,
}

impl VisualBuffer {
    /// Black pixels; RGBA buffers start opaque.
    pub fn new(width: u32, height: u32, model: ColorModel) -> Self {
        let len = Self::expected_len(width, height, model);
        let mut data = vec![0u8; len];
        if model == ColorModel::Rgba {
            for px in data.chunks_exact_mut(4) {
                px[3] = 255;
            }
        }
        Self {
            width,
            height,
            model,
            data,
        }
    }

    pub fn from_raw(
        width: u32,
        height: u32,
        model: ColorModel,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = Self::expected_len(width, height, model);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                what: "visual",
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            model,
            data,
        })
    }

    fn expected_len(width: u32, height: u32, model: ColorModel) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(model.channels())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn model(&self) -> ColorModel {
        self.model
    }

    pub fn channels(&self) -> usize {
        self.model.channels()
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        let idx = self.offset(x, y)?;
        self.data.get(idx..idx + self.channels())
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut [u8]> {
        let idx = self.offset(x, y)?;
        let channels = self.channels();
        self.data.get_mut(idx..idx + channels)
    }

    /// Writes `color` (RGBA) if the coordinate is inside the buffer; alpha is
    /// only written for RGBA buffers and gray gets the channel mean.
    pub fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let model = self.model;
        let Some(px) = self.pixel_mut(x as u32, y as u32) else {
            return;
        };
        match model {
            ColorModel::Gray => {
                let sum = color[0] as u16 + color[1] as u16 + color[2] as u16;
                px[0] = (sum / 3) as u8;
            }
            ColorModel::Rgb => px.copy_from_slice(&color[..3]),
            ColorModel::Rgba => px.copy_from_slice(&color),
        }
    }

    /// Expands to RGBA, the format every sink understands.
    pub fn to_rgba(&self) -> VisualBuffer {
        match self.model {
            ColorModel::Rgba => self.clone(),
            ColorModel::Rgb => {
                let mut out = Vec::with_capacity(self.pixel_count() * 4);
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                self.with_rgba(out)
            }
            ColorModel::Gray => {
                let mut out = Vec::with_capacity(self.pixel_count() * 4);
                for &v in &self.data {
                    out.extend_from_slice(&[v, v, v, 255]);
                }
                self.with_rgba(out)
            }
        }
    }

    fn with_rgba(&self, data: Vec<u8>) -> VisualBuffer {
        VisualBuffer {
            width: self.width,
            height: self.height,
            model: ColorModel::Rgba,
            data,
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * self.channels())
    }
}
