//! Pixel-level color operations used by the augmenters
//!
//! The kernels follow the classic enhancement model: every adjustment is a
//! linear blend between the source and a degenerate image (black, mean gray,
//! or the grayscale copy). Blends truncate toward zero and saturate, the way
//! Pillow's `Image.blend` does; color-space conversions round.

use image::{Rgb, RgbImage};

/// The six orderings of the R, G, B channels, identity first
pub const CHANNEL_ORDERS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// One channel of `lo + (hi - lo) * alpha`, truncated and saturated
#[inline]
fn blend_channel(lo: u8, hi: u8, alpha: f32) -> u8 {
    let lo = lo as f32;
    (lo + (hi as f32 - lo) * alpha).clamp(0.0, 255.0) as u8
}

/// ITU-R 601-2 luma in 16-bit fixed point
#[inline]
pub fn grayscale_luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn map_pixels(img: &RgbImage, f: impl Fn(Rgb<u8>) -> Rgb<u8>) -> RgbImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        *pixel = f(*pixel);
    }
    out
}

/// Grayscale replicated to three channels
pub fn to_gray3(img: &RgbImage) -> RgbImage {
    map_pixels(img, |Rgb([r, g, b])| {
        let l = grayscale_luma(r, g, b);
        Rgb([l, l, l])
    })
}

/// `a * (1 - alpha) + b * alpha`; both images must share dimensions
pub fn blend(a: &RgbImage, b: &RgbImage, alpha: f32) -> RgbImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = a.clone();
    for (dst, src) in out.pixels_mut().zip(b.pixels()) {
        for c in 0..3 {
            dst[c] = blend_channel(dst[c], src[c], alpha);
        }
    }
    out
}

/// Blend toward a solid color
pub fn tint(img: &RgbImage, color: [u8; 3], alpha: f32) -> RgbImage {
    map_pixels(img, |Rgb(p)| {
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = blend_channel(p[c], color[c], alpha);
        }
        Rgb(out)
    })
}

/// Scale toward black: factor 0 gives black, 1 the original
pub fn enhance_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    map_pixels(img, |Rgb(p)| {
        Rgb([
            blend_channel(0, p[0], factor),
            blend_channel(0, p[1], factor),
            blend_channel(0, p[2], factor),
        ])
    })
}

/// Rounded mean luma of the whole image
pub fn mean_luma(img: &RgbImage) -> u8 {
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return 0;
    }
    let sum: u64 = img
        .pixels()
        .map(|Rgb([r, g, b])| grayscale_luma(*r, *g, *b) as u64)
        .sum();
    ((sum as f64 / count as f64) + 0.5) as u8
}

/// Scale around the mean luma: factor 0 gives flat gray
pub fn enhance_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luma(img);
    map_pixels(img, |Rgb(p)| {
        Rgb([
            blend_channel(mean, p[0], factor),
            blend_channel(mean, p[1], factor),
            blend_channel(mean, p[2], factor),
        ])
    })
}

/// Scale around each pixel's own luma: factor 0 gives grayscale
pub fn enhance_color(img: &RgbImage, factor: f32) -> RgbImage {
    map_pixels(img, |Rgb(p)| {
        let l = grayscale_luma(p[0], p[1], p[2]);
        Rgb([
            blend_channel(l, p[0], factor),
            blend_channel(l, p[1], factor),
            blend_channel(l, p[2], factor),
        ])
    })
}

/// RGB to 8-bit HSV, hue spanning 0..=255
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    if maxc == minc {
        return [0, 0, maxc];
    }
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let (maxf, minf) = (maxc as f32, minc as f32);
    let span = maxf - minf;
    let s = span / maxf;
    let rc = (maxf - rf) / span;
    let gc = (maxf - gf) / span;
    let bc = (maxf - bf) / span;
    let h = if r == maxc {
        bc - gc
    } else if g == maxc {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    let h = (h / 6.0 + 1.0).rem_euclid(1.0);
    [
        (h * 255.0).clamp(0.0, 255.0) as u8,
        (s * 255.0).clamp(0.0, 255.0) as u8,
        maxc,
    ]
}

/// 8-bit HSV back to RGB
pub fn hsv_to_rgb([h, s, v]: [u8; 3]) -> Rgb<u8> {
    if s == 0 {
        return Rgb([v, v, v]);
    }
    let hf = h as f32 * 6.0 / 255.0;
    let sf = s as f32 / 255.0;
    let vf = v as f32;
    let i = hf.floor();
    let f = hf - i;
    let p = clamp_u8(vf * (1.0 - sf));
    let q = clamp_u8(vf * (1.0 - sf * f));
    let t = clamp_u8(vf * (1.0 - sf * (1.0 - f)));
    match (i as i32).rem_euclid(6) {
        0 => Rgb([v, t, p]),
        1 => Rgb([q, v, p]),
        2 => Rgb([p, v, t]),
        3 => Rgb([p, q, v]),
        4 => Rgb([t, p, v]),
        _ => Rgb([v, p, q]),
    }
}

/// Rotate the hue by `degrees` on the 8-bit hue wheel
pub fn hue_shift(img: &RgbImage, degrees: f32) -> RgbImage {
    let offset = (degrees / 360.0 * 255.0) as i32;
    map_pixels(img, |pixel| {
        let [h, s, v] = rgb_to_hsv(pixel);
        let h = (h as i32 + offset).rem_euclid(255) as u8;
        hsv_to_rgb([h, s, v])
    })
}

/// RGB to full-range (JPEG) YCbCr
pub fn rgb_to_ycbcr(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    [
        clamp_u8(0.299 * r + 0.587 * g + 0.114 * b),
        clamp_u8(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b),
        clamp_u8(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b),
    ]
}

pub fn ycbcr_to_rgb([y, cb, cr]: [u8; 3]) -> Rgb<u8> {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    Rgb([
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp_u8(y + 1.772 * cb),
    ])
}

/// Keep luma, offset both chroma planes
pub fn shift_chroma(img: &RgbImage, d_cb: i32, d_cr: i32) -> RgbImage {
    map_pixels(img, |pixel| {
        let [y, cb, cr] = rgb_to_ycbcr(pixel);
        let cb = (cb as i32 + d_cb).clamp(0, 255) as u8;
        let cr = (cr as i32 + d_cr).clamp(0, 255) as u8;
        ycbcr_to_rgb([y, cb, cr])
    })
}

/// Reorder channels; output channel `i` takes input channel `order[i]`
pub fn permute_channels(img: &RgbImage, order: [usize; 3]) -> RgbImage {
    map_pixels(img, |Rgb(p)| Rgb([p[order[0]], p[order[1]], p[order[2]]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(4, 3, Rgb(rgb))
    }

    #[test]
    fn test_grayscale_luma() {
        assert_eq!(grayscale_luma(0, 0, 0), 0);
        assert_eq!(grayscale_luma(255, 255, 255), 255);
        assert_eq!(grayscale_luma(255, 0, 0), 76);
        assert_eq!(grayscale_luma(0, 255, 0), 150);
        assert_eq!(grayscale_luma(0, 0, 255), 29);
    }

    #[test]
    fn test_to_gray3_channels_equal() {
        let gray = to_gray3(&solid([200, 40, 90]));
        for Rgb([r, g, b]) in gray.pixels() {
            assert_eq!(r, g);
            assert_eq!(g, b);
        }
    }

    #[test]
    fn test_enhance_identity_at_one() {
        let img = solid([12, 150, 250]);
        assert_eq!(enhance_brightness(&img, 1.0), img);
        assert_eq!(enhance_contrast(&img, 1.0), img);
        assert_eq!(enhance_color(&img, 1.0), img);
    }

    #[test]
    fn test_enhance_degenerate_at_zero() {
        let img = solid([12, 150, 250]);
        assert!(enhance_brightness(&img, 0.0).pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(enhance_color(&img, 0.0), to_gray3(&img));

        let flat = enhance_contrast(&img, 0.0);
        let m = mean_luma(&img);
        assert!(flat.pixels().all(|p| p.0 == [m, m, m]));
    }

    #[test]
    fn test_brightness_clamps() {
        let bright = enhance_brightness(&solid([200, 100, 0]), 2.0);
        assert_eq!(bright.get_pixel(0, 0).0, [255, 200, 0]);
    }

    #[test]
    fn test_blend_and_tint() {
        let a = solid([0, 0, 0]);
        let b = solid([200, 100, 50]);
        assert_eq!(blend(&a, &b, 0.5).get_pixel(1, 1).0, [100, 50, 25]);
        assert_eq!(tint(&a, [200, 100, 50], 0.5), blend(&a, &b, 0.5));
    }

    #[test]
    fn test_blends_truncate() {
        // 50.5 and 100.5 land on the lower level
        let dimmed = enhance_brightness(&solid([101, 201, 1]), 0.5);
        assert_eq!(dimmed.get_pixel(0, 0).0, [50, 100, 0]);
        let mixed = blend(&solid([0, 0, 0]), &solid([201, 3, 255]), 0.5);
        assert_eq!(mixed.get_pixel(0, 0).0, [100, 1, 127]);
        let tinted = tint(&solid([10, 10, 10]), [11, 11, 11], 0.5);
        assert_eq!(tinted.get_pixel(0, 0).0, [10, 10, 10]);

        // pixels pushed below zero saturate instead of wrapping
        let img = RgbImage::from_fn(2, 1, |x, _| Rgb([x as u8 * 200; 3]));
        let stretched = enhance_contrast(&img, 2.0);
        assert_eq!(stretched.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(stretched.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_hsv_roundtrip_is_close() {
        for rgb in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [120, 200, 33], [9, 9, 9]] {
            let back = hsv_to_rgb(rgb_to_hsv(Rgb(rgb)));
            for c in 0..3 {
                assert!(
                    (back[c] as i32 - rgb[c] as i32).abs() <= 8,
                    "{rgb:?} -> {:?}",
                    back.0
                );
            }
        }
    }

    #[test]
    fn test_hue_shift_leaves_gray_alone() {
        let img = solid([128, 128, 128]);
        assert_eq!(hue_shift(&img, 120.0), img);
    }

    #[test]
    fn test_hue_shift_rotates_primary() {
        // a third of the wheel takes red close to green
        let shifted = hue_shift(&solid([255, 0, 0]), 120.0);
        let Rgb([r, g, b]) = *shifted.get_pixel(0, 0);
        assert!(g > 200 && r < 60 && b < 60, "got {r} {g} {b}");
    }

    #[test]
    fn test_shift_chroma_preserves_luma() {
        let img = solid([90, 160, 40]);
        let shifted = shift_chroma(&img, 15, -15);
        let before = rgb_to_ycbcr(*img.get_pixel(0, 0))[0] as i32;
        let after = rgb_to_ycbcr(*shifted.get_pixel(0, 0))[0] as i32;
        assert!((before - after).abs() <= 2);
        assert_ne!(shifted, img);
    }

    #[test]
    fn test_shift_chroma_zero_is_near_identity() {
        let img = solid([90, 160, 40]);
        let same = shift_chroma(&img, 0, 0);
        for c in 0..3 {
            assert!((same.get_pixel(0, 0)[c] as i32 - img.get_pixel(0, 0)[c] as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_permute_channels() {
        let img = solid([1, 2, 3]);
        assert_eq!(permute_channels(&img, [2, 0, 1]).get_pixel(0, 0).0, [3, 1, 2]);
        assert_eq!(permute_channels(&img, CHANNEL_ORDERS[0]), img);
    }
}
