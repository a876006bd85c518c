use crate::types::{FaceRegion, FrameAnalysis, HandLandmarks};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

pub const SKELETON_LINE_THICKNESS: i32 = 3;
const BOX_THICKNESS: i32 = 2;
const TEXT_SCALE: i32 = 2;
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = (GLYPH_W + 1) * TEXT_SCALE;

// Off-frame slack kept when clipping, wider than any stroke or dot radius.
const CLIP_MARGIN: f32 = 64.0;

const LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const POINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

/// Draws every detection in `analysis` onto an RGBA buffer.
pub fn annotate(buffer: &mut [u8], width: u32, height: u32, analysis: &FrameAnalysis) {
    for face in &analysis.faces {
        draw_face(buffer, width, height, face);
    }

    for hand in &analysis.hands {
        draw_skeleton(buffer, width, height, &hand.landmarks);

        let [x1, y1, x2, y2] = hand.landmarks.bounds();
        draw_rect(buffer, width, height, x1, y1, x2, y2, GREEN, BOX_THICKNESS);
        if hand.thumbs_up {
            let baseline = to_canvas(y1, height) - 10;
            let x = to_canvas(x1, width);
            draw_text(buffer, width, height, x, baseline - text_height(), "Thumbs Up", GREEN);
        }
    }

    if let Some(top) = analysis.top_gesture() {
        let label = format!("{} ({:.2})", top.kind.name(), top.score);
        draw_text(buffer, width, height, 10, 30 - text_height(), &label, GREEN);
    }
}

fn draw_face(buffer: &mut [u8], width: u32, height: u32, face: &FaceRegion) {
    let [x1, y1, x2, y2] = face.bbox;
    draw_rect(buffer, width, height, x1, y1, x2, y2, GREEN, BOX_THICKNESS);
}

pub fn draw_skeleton(buffer: &mut [u8], width: u32, height: u32, landmarks: &HandLandmarks) {
    let points: Vec<(f32, f32)> = landmarks.points().iter().map(|p| (p[0], p[1])).collect();

    for &(a, b) in CONNECTIONS {
        draw_line(
            buffer,
            width,
            height,
            &points[a],
            &points[b],
            LINE_COLOR,
            SKELETON_LINE_THICKNESS,
        );
    }

    let point_radius = (SKELETON_LINE_THICKNESS / 2).max(2) + 1;
    for &(x, y) in &points {
        draw_circle(
            buffer,
            width,
            height,
            (to_canvas(x, width), to_canvas(y, height)),
            point_radius,
            POINT_COLOR,
        );
    }
}

fn text_height() -> i32 {
    GLYPH_H * TEXT_SCALE
}

/// Renders `text` in the built-in 5x7 font with its top-left corner at (x, y).
/// Lowercase letters are drawn as capitals; unsupported characters leave a gap.
pub fn draw_text(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    mut x: i32,
    y: i32,
    text: &str,
    color: [u8; 4],
) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = x + col * TEXT_SCALE;
                    let py = y + row as i32 * TEXT_SCALE;
                    for sy in 0..TEXT_SCALE {
                        for sx in 0..TEXT_SCALE {
                            put_pixel_safe(buffer, width, height, px + sx, py + sy, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

fn draw_rect(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    color: [u8; 4],
    thickness: i32,
) {
    let corners = [(x1, y1), (x2, y1), (x2, y2), (x1, y2)];
    for i in 0..corners.len() {
        let next = corners[(i + 1) % corners.len()];
        draw_line(buffer, width, height, &corners[i], &next, color, thickness);
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let Some((p0, p1)) = clip_segment(*p0, *p1, width, height) else {
        return;
    };
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(buffer, width, height, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                        put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
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

/// Clamps a coordinate to the frame plus `CLIP_MARGIN` so later integer math
/// cannot overflow.
fn to_canvas(v: f32, extent: u32) -> i32 {
    if !v.is_finite() {
        return -(CLIP_MARGIN as i32);
    }
    v.clamp(-CLIP_MARGIN, extent as f32 + CLIP_MARGIN) as i32
}

/// Liang-Barsky clip of `p0 -> p1` against the frame grown by `CLIP_MARGIN`.
/// `None` when the segment misses it entirely or is not finite.
fn clip_segment(
    p0: (f32, f32),
    p1: (f32, f32),
    width: u32,
    height: u32,
) -> Option<((f32, f32), (f32, f32))> {
    if ![p0.0, p0.1, p1.0, p1.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let min = -CLIP_MARGIN as f64;
    let max = [width as f64 + CLIP_MARGIN as f64, height as f64 + CLIP_MARGIN as f64];
    let start = [p0.0 as f64, p0.1 as f64];
    let delta = [p1.0 as f64 - start[0], p1.1 as f64 - start[1]];

    // (t, axis, bound) for the entry and exit points.
    let mut enter = (0.0, None);
    let mut exit = (1.0, None);
    for axis in 0..2 {
        for (p, q, bound) in [
            (-delta[axis], start[axis] - min, min),
            (delta[axis], max[axis] - start[axis], max[axis]),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let t = q / p;
            if p < 0.0 && t > enter.0 {
                enter = (t, Some((axis, bound)));
            } else if p > 0.0 && t < exit.0 {
                exit = (t, Some((axis, bound)));
            }
            if enter.0 > exit.0 {
                return None;
            }
        }
    }

    let at = |(t, edge): (f64, Option<(usize, f64)>)| {
        let mut point = [start[0] + t * delta[0], start[1] + t * delta[1]];
        // The coordinate on the clipping edge is exact; interpolation is not.
        if let Some((axis, bound)) = edge {
            point[axis] = bound;
        }
        (
            point[0].clamp(min, max[0]) as f32,
            point[1].clamp(min, max[1]) as f32,
        )
    };
    Some((at(enter), at(exit)))
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DetectedHand, GestureCategory, GestureKind, Handedness, NUM_LANDMARKS,
    };

    const W: u32 = 96;
    const H: u32 = 96;

    fn canvas() -> Vec<u8> {
        vec![0u8; (W * H * 4) as usize]
    }

    fn pixel(buffer: &[u8], x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * W + x) * 4) as usize;
        [buffer[idx], buffer[idx + 1], buffer[idx + 2], buffer[idx + 3]]
    }

    fn count(buffer: &[u8], color: [u8; 4], rows: std::ops::Range<u32>) -> usize {
        rows.flat_map(|y| (0..W).map(move |x| (x, y)))
            .filter(|&(x, y)| pixel(buffer, x, y) == color)
            .count()
    }

    fn hand(thumbs_up: bool) -> DetectedHand {
        let points: Vec<[f32; 3]> = (0..NUM_LANDMARKS)
            .map(|i| [20.0 + (i % 5) as f32 * 4.0, 70.0 + (i / 5) as f32 * 4.0, 0.0])
            .collect();
        DetectedHand {
            landmarks: HandLandmarks::new(&points).unwrap(),
            handedness: Handedness::Right,
            score: 0.9,
            thumbs_up,
            gesture: GestureCategory {
                kind: GestureKind::ThumbUp,
                score: 0.87,
            },
        }
    }

    #[test]
    fn test_pixels_outside_frame_are_ignored() {
        let mut buffer = canvas();
        put_pixel_safe(&mut buffer, W, H, -1, 0, GREEN);
        put_pixel_safe(&mut buffer, W, H, W as i32, 3, GREEN);
        draw_text(&mut buffer, W, H, -200, -200, "HIDDEN", GREEN);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_lines_with_extreme_endpoints_are_clipped() {
        let mut buffer = canvas();
        // Horizontal line through y = 10 from far off-screen on both sides.
        draw_line(&mut buffer, W, H, &(-1e30, 10.0), &(1e30, 10.0), GREEN, 1);
        assert_eq!(count(&buffer, GREEN, 10..11), W as usize);
        assert_eq!(count(&buffer, GREEN, 0..H), W as usize);

        let mut buffer = canvas();
        draw_line(&mut buffer, W, H, &(f32::MAX, f32::MAX), &(f32::MAX, -f32::MAX), GREEN, 3);
        draw_line(&mut buffer, W, H, &(f32::NAN, 0.0), &(5.0, 5.0), GREEN, 3);
        draw_rect(&mut buffer, W, H, -1e20, -1e20, -1e19, -1e19, GREEN, 2);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clipped_diagonal_keeps_its_slope() {
        let (a, b) = clip_segment((-1000.0, -1000.0), (1000.0, 1000.0), W, H).unwrap();
        assert!((a.0 - a.1).abs() < 1e-3 && (b.0 - b.1).abs() < 1e-3);
        assert_eq!(a.0, -CLIP_MARGIN);
        assert_eq!(b.0, H as f32 + CLIP_MARGIN);
        assert!(clip_segment((-500.0, 0.0), (-400.0, 50.0), W, H).is_none());
    }

    #[test]
    fn test_draw_text_scales_glyphs() {
        let mut buffer = canvas();
        draw_text(&mut buffer, W, H, 0, 0, "-", GREEN);
        // '-' is a single 5px bar on row 3, doubled in both directions.
        assert_eq!(count(&buffer, GREEN, 0..H), 5 * 2 * 2);
        assert_eq!(pixel(&buffer, 0, 6), GREEN);
        assert_eq!(pixel(&buffer, 9, 7), GREEN);
        assert_eq!(pixel(&buffer, 10, 6), [0; 4]);
    }

    #[test]
    fn test_lowercase_matches_uppercase() {
        let mut lower = canvas();
        let mut upper = canvas();
        draw_text(&mut lower, W, H, 2, 2, "up", GREEN);
        draw_text(&mut upper, W, H, 2, 2, "UP", GREEN);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_face_box_outline() {
        let mut buffer = canvas();
        let analysis = FrameAnalysis {
            hands: Vec::new(),
            faces: vec![FaceRegion {
                bbox: [10.0, 10.0, 30.0, 30.0],
                keypoints: Vec::new(),
                score: 0.9,
            }],
        };
        annotate(&mut buffer, W, H, &analysis);
        assert_eq!(pixel(&buffer, 10, 20), GREEN);
        assert_eq!(pixel(&buffer, 20, 30), GREEN);
        assert_eq!(pixel(&buffer, 20, 20), [0; 4]);
    }

    #[test]
    fn test_thumbs_up_label_only_for_matching_hand() {
        // The banner occupies rows 16..30 and the hand box starts at row 70.
        let rows_above_hand = 40..64;

        let mut plain = canvas();
        let mut analysis = FrameAnalysis {
            hands: vec![hand(false)],
            faces: Vec::new(),
        };
        annotate(&mut plain, W, H, &analysis);

        let mut labelled = canvas();
        analysis.hands[0].thumbs_up = true;
        annotate(&mut labelled, W, H, &analysis);

        assert_eq!(count(&plain, GREEN, rows_above_hand.clone()), 0);
        assert!(count(&labelled, GREEN, rows_above_hand) > 0);
        assert_eq!(pixel(&labelled, 20, 70), pixel(&plain, 20, 70));
    }
}
