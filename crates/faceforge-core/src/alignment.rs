//! Face alignment via 4-DOF similarity transform.
//!
//! Warps detected faces to canonical crops using five reference landmarks and
//! least-squares estimation, and pastes processed crops back into the frame.

use crate::types::Frame;
use image::Rgb;

/// ArcFace reference landmarks for a 112×112 output.
pub const ARCFACE_TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 restoration crop.
pub const FFHQ_TEMPLATE_512: [(f32, f32); 5] = [
    (192.98138, 239.94708),
    (318.90277, 240.1936),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// ArcFace template rescaled to an `size × size` crop.
///
/// Multiples of 112 scale directly; other sizes use the 128-based layout with
/// an 8-pixel horizontal shift (the convention the swap model was trained on).
pub fn arcface_template(size: u32) -> [(f32, f32); 5] {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_TEMPLATE_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Map a destination (crop) point back to source (frame) coordinates.
fn invert_point(matrix: &[f32; 6], x: f32, y: f32) -> Option<(f32, f32)> {
    let (a, b, tx, ty) = (matrix[0], matrix[3], matrix[2], matrix[5]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return None;
    }
    let dx = x - tx;
    let dy = y - ty;
    Some(((a * dx + b * dy) / det, (-b * dx + a * dy) / det))
}

/// Map a source (frame) point to destination (crop) coordinates.
fn forward_point(matrix: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
    (
        matrix[0] * x + matrix[1] * y + matrix[2],
        matrix[3] * x + matrix[4] * y + matrix[5],
    )
}

/// Bilinear sample of an RGB image; out-of-bounds taps read as black.
fn sample_bilinear(image: &Frame, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let (w, h) = (image.width() as i64, image.height() as i64);

    let tap = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = tap(x0, y0);
    let tr = tap(x0 + 1, y0);
    let bl = tap(x0, y0 + 1);
    let br = tap(x0 + 1, y0 + 1);

    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy
    })
}

/// Apply a 2×3 similarity warp to produce an `out_width × out_height` crop.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with black.
pub fn warp_affine(frame: &Frame, matrix: &[f32; 6], out_width: u32, out_height: u32) -> Frame {
    let mut output = Frame::new(out_width, out_height);
    if invert_point(matrix, 0.0, 0.0).is_none() {
        return output;
    }

    for oy in 0..out_height {
        for ox in 0..out_width {
            let (sx, sy) = invert_point(matrix, ox as f32, oy as f32).unwrap_or_default();
            let rgb = sample_bilinear(frame, sx, sy);
            output.put_pixel(ox, oy, Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8)));
        }
    }

    output
}

/// Align a detected face to a canonical `size × size` crop.
///
/// Returns the crop and the frame→crop transform for [`paste_back`].
pub fn align_face(
    frame: &Frame,
    landmarks: &[(f32, f32); 5],
    template: &[(f32, f32); 5],
    size: u32,
) -> (Frame, [f32; 6]) {
    let matrix = estimate_similarity_transform(landmarks, template);
    (warp_affine(frame, &matrix, size, size), matrix)
}

/// Blend a processed crop back into `frame` through the inverse of `matrix`.
///
/// The crop border fades out over `feather` crop pixels so the seam is not
/// visible.
pub fn paste_back(frame: &mut Frame, crop: &Frame, matrix: &[f32; 6], feather: f32) {
    let (cw, ch) = (crop.width() as f32, crop.height() as f32);
    let corners = [(0.0, 0.0), (cw, 0.0), (0.0, ch), (cw, ch)];
    let mapped: Vec<(f32, f32)> = corners
        .iter()
        .filter_map(|&(x, y)| invert_point(matrix, x, y))
        .collect();
    if mapped.len() != corners.len() {
        return;
    }

    let min_x = mapped.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = mapped.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (mapped.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.width() as i64) as u32;
    let max_y = (mapped.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.height() as i64) as u32;

    let feather = feather.max(1.0);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = forward_point(matrix, x as f32, y as f32);
            if cx < 0.0 || cy < 0.0 || cx > cw - 1.0 || cy > ch - 1.0 {
                continue;
            }
            let edge = cx.min(cy).min(cw - 1.0 - cx).min(ch - 1.0 - cy);
            let alpha = (edge / feather).clamp(0.0, 1.0);
            if alpha <= 0.0 {
                continue;
            }

            let src = sample_bilinear(crop, cx, cy);
            let dst = frame.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = src[c] * alpha + dst.0[c] as f32 * (1.0 - alpha);
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
