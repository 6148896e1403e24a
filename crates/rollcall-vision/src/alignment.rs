//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! A 2-D similarity transform (uniform scale, rotation, translation) is fit
//! from the detected landmarks to the reference landmarks in closed form,
//! then each output pixel is sampled bilinearly from the source image
//! through the inverse transform.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112×112 crop.
const REFERENCE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `[a, b, tx, ty]` for the map `(x, y) -> (a·x − b·y + tx, b·x + a·y + ty)`.
type Similarity = [f32; 4];

/// Least-squares similarity transform taking `src` onto `dst`.
fn fit_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (mx, my) = mean(src);
    let (nx, ny) = mean(dst);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut norm = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (px, py) = (sx - mx, sy - my);
        let (qx, qy) = (dx - nx, dy - ny);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm += px * px + py * py;
    }

    if norm <= f32::EPSILON {
        // Degenerate landmarks: fall back to a pure translation.
        return [1.0, 0.0, nx - mx, ny - my];
    }
    let a = dot / norm;
    let b = cross / norm;
    [a, b, nx - (a * mx - b * my), ny - (b * mx + a * my)]
}

fn invert(t: Similarity) -> Similarity {
    let [a, b, tx, ty] = t;
    let det = a * a + b * b;
    if det <= f32::EPSILON {
        return [1.0, 0.0, -tx, -ty];
    }
    let (ia, ib) = (a / det, -b / det);
    [ia, ib, -(ia * tx - ib * ty), -(ib * tx + ia * ty)]
}

fn apply(t: &Similarity, x: f32, y: f32) -> (f32, f32) {
    let [a, b, tx, ty] = *t;
    (a * x - b * y + tx, b * x + a * y + ty)
}

/// Bilinear sample with edge clamping.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let max_x = image.width() as f32 - 1.0;
    let max_y = image.height() as f32 - 1.0;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let px = |xx, yy| image.get_pixel(xx, yy).0;
    let (tl, tr, bl, br) = (px(x0, y0), px(x1, y0), px(x0, y1), px(x1, y1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Warp the face described by `landmarks` into a 112×112 aligned crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    }
    let to_source = invert(fit_similarity(landmarks, &REFERENCE));
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |x, y| {
        let (sx, sy) = apply(&to_source, x as f32, y as f32);
        sample(image, sx, sy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_identity_fit() {
        let t = fit_similarity(&REFERENCE, &REFERENCE);
        assert!((t[0] - 1.0).abs() < 1e-5);
        assert!(t[1].abs() < 1e-5);
        assert!(t[2].abs() < 1e-3 && t[3].abs() < 1e-3);
    }

    #[test]
    fn test_recovers_scale_and_shift() {
        // Source landmarks are the reference at twice the size, shifted.
        let src = REFERENCE.map(|(x, y)| (x * 2.0 + 30.0, y * 2.0 + 10.0));
        let t = fit_similarity(&src, &REFERENCE);
        for (s, r) in src.iter().zip(REFERENCE.iter()) {
            assert!(close(apply(&t, s.0, s.1), *r));
        }
    }

    #[test]
    fn test_recovers_rotation() {
        // Rotate the reference by 90° about the origin: (x, y) -> (-y, x).
        let src = REFERENCE.map(|(x, y)| (-y + 200.0, x));
        let t = fit_similarity(&src, &REFERENCE);
        for (s, r) in src.iter().zip(REFERENCE.iter()) {
            assert!(close(apply(&t, s.0, s.1), *r), "{:?}", apply(&t, s.0, s.1));
        }
    }

    #[test]
    fn test_invert_roundtrip() {
        let t = [0.8, 0.3, 12.0, -4.0];
        let inv = invert(t);
        let (x, y) = apply(&t, 17.0, 42.0);
        assert!(close(apply(&inv, x, y), (17.0, 42.0)));
    }

    #[test]
    fn test_align_output_size_and_uniform_colour() {
        let image = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        let src = REFERENCE.map(|(x, y)| (x + 50.0, y + 40.0));
        let aligned = align_face(&image, &src);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert!(aligned.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn test_align_translates_content() {
        // Landmarks at reference + (50, 40): output (x, y) reads source (x+50, y+40).
        let image = RgbImage::from_fn(300, 200, |x, _| Rgb([x as u8, 0, 0]));
        let src = REFERENCE.map(|(x, y)| (x + 50.0, y + 40.0));
        let aligned = align_face(&image, &src);
        assert_eq!(aligned.get_pixel(0, 0)[0], 50);
        assert_eq!(aligned.get_pixel(100, 0)[0], 150);
    }
}
