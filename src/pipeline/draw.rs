use super::buffer::VisualBuffer;

pub fn draw_line(
    buffer: &mut VisualBuffer,
    p0: (i32, i32),
    p1: (i32, i32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        buffer.put_pixel(x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    if ox.abs() + oy.abs() <= radius {
                        buffer.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn draw_disc(buffer: &mut VisualBuffer, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                buffer.put_pixel(cx + dx, cy + dy, color);
            }
        }
    }
}

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;

/// Rows of a 5x7 glyph, most significant of the low five bits leftmost.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}

/// Stamps `text` with its glyph top-left at `origin`. Unknown characters
/// advance like a space.
pub fn draw_text(
    buffer: &mut VisualBuffer,
    text: &str,
    origin: (i32, i32),
    scale: i32,
    color: [u8; 4],
) {
    let scale = scale.max(1);
    let mut pen_x = origin.0;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let x = pen_x + col * scale;
                    let y = origin.1 + row as i32 * scale;
                    for sy in 0..scale {
                        for sx in 0..scale {
                            buffer.put_pixel(x + sx, y + sy, color);
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

pub fn text_height(scale: i32) -> i32 {
    GLYPH_HEIGHT * scale.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buffer::ColorModel;

    const RED: [u8; 4] = [255, 0, 0, 255];

    fn lit(buffer: &VisualBuffer) -> usize {
        buffer
            .as_bytes()
            .chunks_exact(4)
            .filter(|px| px[0] == 255)
            .count()
    }

    #[test]
    fn line_hits_both_endpoints() {
        let mut buffer = VisualBuffer::new(10, 10, ColorModel::Rgba);
        draw_line(&mut buffer, (1, 1), (8, 5), RED, 1);
        assert_eq!(buffer.pixel(1, 1).unwrap()[0], 255);
        assert_eq!(buffer.pixel(8, 5).unwrap()[0], 255);
        assert_eq!(lit(&buffer), 8);
    }

    #[test]
    fn line_clips_outside_buffer() {
        let mut buffer = VisualBuffer::new(4, 4, ColorModel::Rgba);
        draw_line(&mut buffer, (-10, 1), (20, 1), RED, 3);
        assert_eq!(buffer.as_bytes().len(), 64);
        assert!(lit(&buffer) > 0);
    }

    #[test]
    fn disc_is_round_and_clipped() {
        let mut buffer = VisualBuffer::new(20, 20, ColorModel::Rgba);
        draw_disc(&mut buffer, (10, 10), 5, RED);
        assert_eq!(buffer.pixel(10, 5).unwrap()[0], 255);
        assert_eq!(buffer.pixel(15, 10).unwrap()[0], 255);
        assert_eq!(buffer.pixel(14, 14).unwrap()[0], 0);

        let mut corner = VisualBuffer::new(4, 4, ColorModel::Rgba);
        draw_disc(&mut corner, (0, 0), 5, RED);
        assert_eq!(lit(&corner), 16);
    }

    #[test]
    fn text_stamps_glyph_pixels() {
        let mut buffer = VisualBuffer::new(40, 10, ColorModel::Rgba);
        draw_text(&mut buffer, "I", (0, 0), 1, RED);
        // I: top bar of three, four stem pixels, bottom bar of three.
        assert_eq!(lit(&buffer), 3 + 5 + 3);
        assert_eq!(buffer.pixel(2, 3).unwrap()[0], 255);
        assert_eq!(buffer.pixel(0, 3).unwrap()[0], 0);
    }

    #[test]
    fn text_scale_multiplies_pixels() {
        let mut small = VisualBuffer::new(60, 30, ColorModel::Rgba);
        draw_text(&mut small, "GRAB", (0, 0), 1, RED);
        let mut large = VisualBuffer::new(60, 30, ColorModel::Rgba);
        draw_text(&mut large, "GRAB", (0, 0), 2, RED);
        assert_eq!(lit(&large), lit(&small) * 4);
        assert_eq!(text_height(3), 21);
    }
}
