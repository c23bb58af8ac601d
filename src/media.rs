use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, ImageEncoder, RgbaImage};

use crate::types::StickerAsset;

/// Telegram's bounding box for static stickers.
pub const MAX_STICKER_EDGE: u32 = 512;

/// Coarse format class, guessed from the download URL. Decoding never trusts
/// it blindly: the animated path falls back to the still path on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    Gif,
    WebP,
    Other,
}

impl FormatHint {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "gif" => FormatHint::Gif,
            "webp" => FormatHint::WebP,
            _ => FormatHint::Other,
        }
    }
}

/// Convert an arbitrary downloaded media blob into a static RGBA PNG within
/// the sticker bounding box. Animated sources contribute frame 0 only; the
/// target format in this pipeline is static.
pub fn normalize(bytes: &[u8], hint: FormatHint) -> Result<StickerAsset> {
    let rgba = match hint {
        FormatHint::Gif => match gif_first_frame(bytes) {
            Ok(frame) => frame,
            // Mislabeled or truncated GIF: best-effort still decode.
            Err(_) => decode_still(bytes)?,
        },
        FormatHint::WebP | FormatHint::Other => decode_still(bytes)?,
    };

    let (w, h) = fit_within(rgba.width(), rgba.height(), MAX_STICKER_EDGE);
    let resized = if (w, h) == (rgba.width(), rgba.height()) {
        rgba
    } else {
        image::imageops::resize(&rgba, w, h, FilterType::Lanczos3)
    };

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            resized.as_raw(),
            resized.width(),
            resized.height(),
            image::ExtendedColorType::Rgba8,
        )
        .context("encoding sticker PNG")?;

    Ok(StickerAsset {
        width: resized.width(),
        height: resized.height(),
        png,
    })
}

/// Frame 0 of an animated GIF, composited over a transparent canvas.
fn gif_first_frame(bytes: &[u8]) -> Result<RgbaImage> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).context("opening GIF")?;
    let frame = decoder
        .into_frames()
        .next()
        .context("GIF has no frames")?
        .context("decoding first GIF frame")?;
    let buffer = frame.into_buffer();
    let mut canvas = RgbaImage::new(buffer.width(), buffer.height());
    image::imageops::overlay(&mut canvas, &buffer, 0, 0);
    Ok(canvas)
}

fn decode_still(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).context("decoding media")?;
    Ok(img.to_rgba8())
}

/// Dimensions after fitting into a square bounding box, aspect preserved.
/// Images already inside the box are untouched (never upscale).
pub fn fit_within(w: u32, h: u32, max_edge: u32) -> (u32, u32) {
    let long = w.max(h);
    if long <= max_edge {
        return (w, h);
    }
    let scale = max_edge as f64 / long as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    (nw, nh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, Rgba};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([200, 40, 40, 255]));
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn fit_within_scales_long_edge() {
        assert_eq!(fit_within(1024, 256, 512), (512, 128));
        assert_eq!(fit_within(256, 1024, 512), (128, 512));
        assert_eq!(fit_within(512, 512, 512), (512, 512));
    }

    #[test]
    fn fit_within_never_upscales() {
        assert_eq!(fit_within(200, 100, 512), (200, 100));
        assert_eq!(fit_within(1, 1, 512), (1, 1));
    }

    #[test]
    fn normalize_downscales_oversized_raster() {
        let asset = normalize(&png_bytes(1024, 256), FormatHint::Other).unwrap();
        assert_eq!((asset.width, asset.height), (512, 128));
    }

    #[test]
    fn normalize_leaves_small_raster_alone() {
        let asset = normalize(&png_bytes(200, 100), FormatHint::Other).unwrap();
        assert_eq!((asset.width, asset.height), (200, 100));
    }

    #[test]
    fn normalize_takes_first_gif_frame() {
        let mut gif = Vec::new();
        {
            let mut enc = GifEncoder::new(&mut gif);
            let red = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]));
            let blue = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
            enc.encode_frames(vec![Frame::new(red), Frame::new(blue)])
                .unwrap();
        }
        let asset = normalize(&gif, FormatHint::Gif).unwrap();
        assert_eq!((asset.width, asset.height), (8, 8));
        // Output must decode back as a single still PNG.
        let round = image::load_from_memory(&asset.png).unwrap().to_rgba8();
        let px = round.get_pixel(0, 0);
        // GIF is palettized; just check the first frame's dominant channel.
        assert!(px[0] > px[2]);
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(normalize(b"not an image at all", FormatHint::Other).is_err());
    }

    #[test]
    fn hint_from_url_ignores_query() {
        assert_eq!(
            FormatHint::from_url("https://x.test/a/giphy.gif?cid=1"),
            FormatHint::Gif
        );
        assert_eq!(
            FormatHint::from_url("https://x.test/a/giphy.webp"),
            FormatHint::WebP
        );
        assert_eq!(FormatHint::from_url("https://x.test/a"), FormatHint::Other);
    }
}
