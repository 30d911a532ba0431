//! Watermark compositing for generated artworks.
//!
//! A single, non-repeating watermark is scaled uniformly until it covers
//! the base image, centered, alpha-blended at a configurable opacity, and
//! cropped to the base bounds. The write path is crash-safe: bytes go to
//! a temp file, the temp file is decode-verified, then atomically renamed
//! over the target.
//!
//! The un-watermarked original is always kept as the clean fulfillment
//! copy; the watermarked sibling is named `watermarked_<original>`.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};

/// Default blend opacity for the watermark layer.
pub const DEFAULT_OPACITY: f32 = 0.25;

/// Overscan factor applied to the cover scale so the watermark bleeds
/// past the base edges instead of leaving a border.
pub const COVER_MARGIN: f64 = 1.1;

#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The freshly written file failed to decode; the target was not replaced.
    #[error("Verification failed for {path}: {reason}")]
    Verify { path: String, reason: String },
}

/// Uniform scale factor that makes a `wm_w`×`wm_h` watermark cover a
/// `base_w`×`base_h` image, with [`COVER_MARGIN`] overscan.
pub fn cover_scale(base_w: u32, base_h: u32, wm_w: u32, wm_h: u32) -> f64 {
    if wm_w == 0 || wm_h == 0 {
        return 0.0;
    }
    let sx = base_w as f64 / wm_w as f64;
    let sy = base_h as f64 / wm_h as f64;
    sx.max(sy) * COVER_MARGIN
}

/// Top-left offset that centers a layer of size `scaled` on a base of
/// size `base`. Negative when the layer overhangs (it is cropped).
pub fn centered_offset(base: u32, scaled: u32) -> i64 {
    (base as i64 - scaled as i64) / 2
}

/// Watermarked sibling filename for `name` (`photo.png` → `watermarked_photo.png`).
pub fn watermarked_name(name: &str) -> String {
    format!("watermarked_{name}")
}

/// Composite `watermark` over `base` per the cover/center/opacity contract.
///
/// Pure with respect to its inputs; the result keeps the base image's
/// dimensions and alpha channel.
pub fn composite(base: &DynamicImage, watermark: &DynamicImage, opacity: f32) -> RgbaImage {
    let mut out = base.to_rgba8();
    let (bw, bh) = (out.width(), out.height());

    let scale = cover_scale(bw, bh, watermark.width(), watermark.height());
    if scale <= 0.0 {
        return out;
    }
    let sw = ((watermark.width() as f64 * scale).round() as u32).max(1);
    let sh = ((watermark.height() as f64 * scale).round() as u32).max(1);
    let scaled = image::imageops::resize(watermark, sw, sh, FilterType::Triangle);

    let ox = centered_offset(bw, sw);
    let oy = centered_offset(bh, sh);
    let opacity = opacity.clamp(0.0, 1.0);

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let wx = x as i64 - ox;
        let wy = y as i64 - oy;
        if wx < 0 || wy < 0 || wx >= sw as i64 || wy >= sh as i64 {
            continue;
        }
        let wp = scaled.get_pixel(wx as u32, wy as u32);
        let alpha = (wp[3] as f32 / 255.0) * opacity;
        if alpha <= 0.0 {
            continue;
        }
        for c in 0..3 {
            let blended = pixel[c] as f32 * (1.0 - alpha) + wp[c] as f32 * alpha;
            pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
        // Base alpha is preserved; the watermark never punches holes.
    }

    out
}

/// Output format matching the base image's extension.
///
/// JPEG bases are re-encoded as RGB JPEG; everything else is written as
/// PNG with the alpha channel preserved.
fn output_format(path: &Path) -> ImageFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
        _ => ImageFormat::Png,
    }
}

/// Watermark `base_path` with `wm_path` and write the result to `out_path`.
///
/// The write is temp-file + decode-verify + atomic rename, so a crash or
/// bad encode never leaves a truncated file at `out_path`. Callers that
/// hit an error should fall back to re-watermarking from the clean copy.
pub fn watermark_file(
    base_path: &Path,
    wm_path: &Path,
    out_path: &Path,
    opacity: f32,
) -> Result<(), WatermarkError> {
    let base = image::open(base_path)?;
    let watermark = image::open(wm_path)?;
    let blended = composite(&base, &watermark, opacity);

    let tmp_path = out_path.with_extension("tmp");
    let format = output_format(out_path);
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(blended).to_rgb8();
            rgb.save_with_format(&tmp_path, ImageFormat::Jpeg)?;
        }
        _ => {
            blended.save_with_format(&tmp_path, ImageFormat::Png)?;
        }
    }

    // Verify the temp file decodes before it replaces anything. The temp
    // file's `.tmp` extension is meaningless to `image::open`, so decode
    // with the format we just wrote.
    let verify = image::ImageReader::open(&tmp_path)
        .map_err(image::ImageError::IoError)
        .and_then(|mut reader| {
            reader.set_format(format);
            reader.decode()
        });
    if let Err(e) = verify {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(WatermarkError::Verify {
            path: out_path.display().to_string(),
            reason: e.to_string(),
        });
    }

    std::fs::rename(&tmp_path, out_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(rgba)))
    }

    #[test]
    fn cover_scale_picks_the_larger_axis() {
        // 100x50 base, 10x10 mark: sx=10, sy=5 -> 10 * 1.1
        let s = cover_scale(100, 50, 10, 10);
        assert!((s - 11.0).abs() < 1e-9);
    }

    #[test]
    fn cover_scale_handles_degenerate_watermark() {
        assert_eq!(cover_scale(100, 100, 0, 10), 0.0);
    }

    #[test]
    fn centered_offset_negative_on_overhang() {
        assert_eq!(centered_offset(100, 110), -5);
        assert_eq!(centered_offset(100, 80), 10);
    }

    #[test]
    fn watermarked_name_prefixes() {
        assert_eq!(watermarked_name("a.png"), "watermarked_a.png");
    }

    #[test]
    fn composite_preserves_base_dimensions() {
        let base = solid(8, 6, [255, 255, 255, 255]);
        let wm = solid(2, 2, [0, 0, 0, 255]);
        let out = composite(&base, &wm, 0.25);
        assert_eq!((out.width(), out.height()), (8, 6));
    }

    #[test]
    fn composite_blends_at_requested_opacity() {
        let base = solid(4, 4, [200, 200, 200, 255]);
        let wm = solid(4, 4, [0, 0, 0, 255]);
        let out = composite(&base, &wm, 0.25);
        // Every pixel is covered: 200 * 0.75 + 0 * 0.25 = 150.
        let p = out.get_pixel(2, 2);
        assert_eq!(p[0], 150);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn composite_with_zero_opacity_is_identity() {
        let base = solid(4, 4, [10, 20, 30, 255]);
        let wm = solid(4, 4, [255, 255, 255, 255]);
        let out = composite(&base, &wm, 0.0);
        assert_eq!(out.get_pixel(1, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn composite_ignores_transparent_watermark_pixels() {
        let base = solid(4, 4, [10, 20, 30, 255]);
        let wm = solid(4, 4, [255, 255, 255, 0]);
        let out = composite(&base, &wm, 1.0);
        assert_eq!(out.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn watermark_file_png_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base_path = dir.path().join("base.png");
        let wm_path = dir.path().join("wm.png");
        let out_path = dir.path().join("watermarked_base.png");

        solid(16, 16, [255, 0, 0, 255]).save(&base_path).unwrap();
        solid(4, 4, [0, 0, 255, 255]).save(&wm_path).unwrap();

        watermark_file(&base_path, &wm_path, &out_path, DEFAULT_OPACITY).unwrap();

        let reloaded = image::open(&out_path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (16, 16));
        // Temp file is gone after the rename.
        assert!(!out_path.with_extension("tmp").exists());
    }

    #[test]
    fn watermark_file_jpeg_reencodes_rgb() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base_path = dir.path().join("base.jpg");
        let wm_path = dir.path().join("wm.png");
        let out_path = dir.path().join("watermarked_base.jpg");

        DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 12, Rgba([128, 128, 128, 255])))
            .to_rgb8()
            .save_with_format(&base_path, ImageFormat::Jpeg)
            .unwrap();
        solid(3, 3, [0, 0, 0, 255]).save(&wm_path).unwrap();

        watermark_file(&base_path, &wm_path, &out_path, DEFAULT_OPACITY).unwrap();

        let reloaded = image::open(&out_path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (12, 12));
    }

    #[test]
    fn rerunning_watermark_is_stable() {
        // Watermarking the watermarked file again must still produce a
        // decodable image of the same dimensions (structural equivalence).
        let dir = tempfile::tempdir().expect("tempdir");
        let base_path = dir.path().join("base.png");
        let wm_path = dir.path().join("wm.png");
        let out_path = dir.path().join("watermarked_base.png");

        solid(10, 10, [250, 250, 250, 255]).save(&base_path).unwrap();
        solid(5, 5, [0, 0, 0, 255]).save(&wm_path).unwrap();

        watermark_file(&base_path, &wm_path, &out_path, DEFAULT_OPACITY).unwrap();
        let first = std::fs::read(&out_path).unwrap();
        watermark_file(&base_path, &wm_path, &out_path, DEFAULT_OPACITY).unwrap();
        let second = std::fs::read(&out_path).unwrap();
        assert_eq!(first, second);
    }
}
