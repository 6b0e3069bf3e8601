//! 图片压缩：送 vision 模型前把长边缩到 1600 像素并转 JPEG

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::extract::mime::sniff_mime;

pub const MAX_SIDE: u32 = 1600;
pub const JPEG_QUALITY: u8 = 85;

/// 返回 (字节, mime)。无法解码时原样返回，mime 按魔数判定
pub fn compress_image(data: &[u8]) -> (Vec<u8>, String) {
    match try_compress(data, MAX_SIDE) {
        Ok(jpeg) => (jpeg, "image/jpeg".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "image compress failed, sending original bytes");
            (data.to_vec(), sniff_mime(data).to_string())
        }
    }
}

fn try_compress(data: &[u8], max_side: u32) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let (w, h) = (img.width(), img.height());
    let longest = w.max(h).max(1);
    let img = if longest > max_side {
        let scale = max_side as f64 / longest as f64;
        let nw = ((w as f64 * scale) as u32).max(1);
        let nh = ((h as f64 * scale) as u32).max(1);
        img.resize_exact(nw, nh, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, image::Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_large_image_is_scaled_down() {
        let (bytes, mime) = compress_image(&png(3200, 800));
        assert_eq!(mime, "image/jpeg");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 1600);
        assert_eq!(decoded.height(), 400);
    }

    #[test]
    fn test_small_image_keeps_size() {
        let (bytes, mime) = compress_image(&png(40, 20));
        assert_eq!(mime, "image/jpeg");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
    }

    #[test]
    fn test_undecodable_returns_original() {
        let (bytes, mime) = compress_image(b"not an image");
        assert_eq!(bytes, b"not an image");
        assert_eq!(mime, "application/octet-stream");
    }
}
