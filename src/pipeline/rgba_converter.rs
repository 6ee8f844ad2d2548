use std::convert::TryFrom;

use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use super::buffer::{ColorModel, VisualBuffer};
use crate::{
    error::FrameError,
    types::{PixelFormat, RawFrame},
};

/// Decodes a color or IR frame into an RGBA buffer of the frame's size.
/// Depth formats are rejected; they go through the depth converter.
pub fn convert_raw_frame(frame: &RawFrame) -> Result<VisualBuffer, FrameError> {
    let (width, height) = (frame.width, frame.height);
    let data = frame.data.as_slice();

    let rgba = match frame.format {
        PixelFormat::Nv12 => nv12_to_rgba(data, width, height)?,
        PixelFormat::Yuyv => yuyv_to_rgba(data, width, height)?,
        PixelFormat::Yuv422 => uyvy_to_rgba(data, width, height)?,
        PixelFormat::Jpeg => jpeg_to_rgba(data, width, height)?,
        PixelFormat::Rgb888 => rgb_like_to_rgba(data, width, height, false)?,
        PixelFormat::Bgr888 => rgb_like_to_rgba(data, width, height, true)?,
        PixelFormat::Gray8 => gray_to_rgba(data, width, height)?,
        PixelFormat::Gray16 => gray16_to_rgba(data, width, height)?,
        other => return Err(FrameError::UnsupportedFormat(other)),
    };

    VisualBuffer::from_raw(width, height, ColorModel::Rgba, rgba)
}

fn pixels(width: u32, height: u32) -> usize {
    (width as usize).saturating_mul(height as usize)
}

fn check_len(what: &'static str, data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::SizeMismatch {
            what,
            got: data.len(),
            expected,
        });
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let y_plane_len = pixels(width, height);
    let uv_plane_len = y_plane_len / 2;
    check_len("NV12", data, y_plane_len + uv_plane_len)?;

    let y_plane = &data[..y_plane_len];
    let uv_plane = &data[y_plane_len..y_plane_len + uv_plane_len];
    let mut rgba = vec![0u8; y_plane_len * 4];

    let image = YuvBiPlanarImage {
        y_plane,
        y_stride: width,
        uv_plane,
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| FrameError::Decode(format!("NV12 to RGBA failed: {err:?}")))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected_len = pixels(width, height) * 2;
    check_len("YUYV", data, expected_len)?;

    let mut rgba = vec![0u8; pixels(width, height) * 4];
    let packed = YuvPackedImage {
        yuy: &data[..expected_len],
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| FrameError::Decode(format!("YUYV422 to RGBA failed: {err:?}")))?;

    Ok(rgba)
}

/// UYVY is YUYV with each luma/chroma byte pair swapped.
fn uyvy_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected_len = pixels(width, height) * 2;
    check_len("YUV422", data, expected_len)?;

    let mut yuyv = data[..expected_len].to_vec();
    yuyv.par_chunks_exact_mut(2).for_each(|pair| pair.swap(0, 1));
    yuyv_to_rgba(&yuyv, width, height)
}

fn jpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| FrameError::Decode(format!("JPEG decode failed: {err:?}")))?;

    if let Some(info) = decoder.info() {
        let decoded_width = usize::try_from(info.width)
            .map_err(|_| FrameError::Decode("JPEG width does not fit usize".into()))?;
        let decoded_height = usize::try_from(info.height)
            .map_err(|_| FrameError::Decode("JPEG height does not fit usize".into()))?;
        if decoded_width != width as usize || decoded_height != height as usize {
            return Err(FrameError::DimensionMismatch(
                decoded_width as u32,
                decoded_height as u32,
                width,
                height,
            ));
        }
    }
    check_len("JPEG", &rgba, pixels(width, height) * 4)?;

    Ok(rgba)
}

fn rgb_like_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    swap_rb: bool,
) -> Result<Vec<u8>, FrameError> {
    let expected_len = pixels(width, height) * 3;
    check_len(if swap_rb { "BGR" } else { "RGB" }, data, expected_len)?;

    let mut rgba = vec![0u8; pixels(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected_len = pixels(width, height);
    check_len("GRAY8", data, expected_len)?;

    let mut rgba = vec![0u8; expected_len * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..expected_len].par_iter().copied())
        .for_each(|(dst, value)| {
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
            dst[3] = 255;
        });

    Ok(rgba)
}

/// IR sensors report small 16-bit intensities; anything above 255 clips white.
fn gray16_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let count = pixels(width, height);
    check_len("GRAY16", data, count * 2)?;

    let mut rgba = vec![0u8; count * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..count * 2].par_chunks_exact(2))
        .for_each(|(dst, src)| {
            let value = u16::from_le_bytes([src[0], src[1]]).min(255) as u8;
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
            dst[3] = 255;
        });

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::StreamKind;

    fn frame(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            kind: StreamKind::Color,
            width,
            height,
            format,
            data,
            timestamp: Duration::ZERO,
            index: 0,
        }
    }

    fn near(actual: u8, expected: u8) -> bool {
        actual.abs_diff(expected) <= 3
    }

    #[test]
    fn rgb_and_bgr_expand_to_rgba() {
        let rgb = convert_raw_frame(&frame(PixelFormat::Rgb888, 1, 1, vec![10, 20, 30])).unwrap();
        assert_eq!(rgb.as_bytes(), &[10, 20, 30, 255]);

        let bgr = convert_raw_frame(&frame(PixelFormat::Bgr888, 1, 1, vec![10, 20, 30])).unwrap();
        assert_eq!(bgr.as_bytes(), &[30, 20, 10, 255]);
    }

    #[test]
    fn gray16_saturates() {
        let mut data = Vec::new();
        for v in [0u16, 200, 256, 1023] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let buffer = convert_raw_frame(&frame(PixelFormat::Gray16, 4, 1, data)).unwrap();
        let reds: Vec<u8> = buffer.as_bytes().chunks_exact(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![0, 200, 255, 255]);
    }

    #[test]
    fn gray8_keeps_dimensions() {
        let buffer = convert_raw_frame(&frame(PixelFormat::Gray8, 3, 2, vec![7; 6])).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (3, 2));
        assert_eq!(buffer.pixel(2, 1), Some(&[7u8, 7, 7, 255][..]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = convert_raw_frame(&frame(PixelFormat::Rgb888, 2, 2, vec![0; 11])).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                what: "RGB",
                got: 11,
                expected: 12
            }
        );
    }

    #[test]
    fn depth_formats_are_not_color() {
        let raw = RawFrame::from_depth_mm(1, 1, &[1000], 0);
        assert_eq!(
            convert_raw_frame(&raw),
            Err(FrameError::UnsupportedFormat(PixelFormat::Depth1Mm))
        );
    }

    #[test]
    fn neutral_yuyv_and_uyvy_decode_to_gray() {
        let yuyv = vec![128u8; 4 * 2 * 2];
        let buffer = convert_raw_frame(&frame(PixelFormat::Yuyv, 4, 2, yuyv)).unwrap();
        assert!(buffer.as_bytes().chunks_exact(4).all(|px| near(px[0], 128)
            && near(px[1], 128)
            && near(px[2], 128)
            && px[3] == 255));

        // Y=200 in UYVY sits in the odd bytes.
        let uyvy: Vec<u8> = (0..16).map(|i| if i % 2 == 0 { 128 } else { 200 }).collect();
        let buffer = convert_raw_frame(&frame(PixelFormat::Yuv422, 4, 2, uyvy)).unwrap();
        assert!(buffer.as_bytes().chunks_exact(4).all(|px| near(px[1], 200)));
    }

    #[test]
    fn neutral_nv12_decodes_to_gray() {
        let mut data = vec![90u8; 4 * 4];
        data.extend(std::iter::repeat_n(128u8, 8));
        let buffer = convert_raw_frame(&frame(PixelFormat::Nv12, 4, 4, data)).unwrap();
        assert!(buffer.as_bytes().chunks_exact(4).all(|px| near(px[0], 90)));
    }

    #[test]
    fn jpeg_frames_decode() {
        let rgb = vec![150u8; 16 * 8 * 3];
        let mut encoded = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut encoded, 95)
            .encode(&rgb, 16, 8, image::ExtendedColorType::Rgb8)
            .unwrap();

        let buffer = convert_raw_frame(&frame(PixelFormat::Jpeg, 16, 8, encoded.clone())).unwrap();
        assert!(buffer.as_bytes().chunks_exact(4).all(|px| near(px[0], 150)));

        let err = convert_raw_frame(&frame(PixelFormat::Jpeg, 8, 8, encoded)).unwrap_err();
        assert_eq!(err, FrameError::DimensionMismatch(16, 8, 8, 8));
    }
}
