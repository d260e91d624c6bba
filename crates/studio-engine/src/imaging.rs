use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Gif,
    Avif,
    Heic,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
            ImageKind::Gif => "gif",
            ImageKind::Avif => "avif",
            ImageKind::Heic => "heic",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Webp => "image/webp",
            ImageKind::Gif => "image/gif",
            ImageKind::Avif => "image/avif",
            ImageKind::Heic => "image/heic",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let lowered = mime.trim().to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return Some(ImageKind::Jpeg);
        }
        if lowered.contains("png") {
            return Some(ImageKind::Png);
        }
        if lowered.contains("webp") {
            return Some(ImageKind::Webp);
        }
        if lowered.contains("gif") {
            return Some(ImageKind::Gif);
        }
        if lowered.contains("avif") {
            return Some(ImageKind::Avif);
        }
        if lowered.contains("heic") || lowered.contains("heif") {
            return Some(ImageKind::Heic);
        }
        None
    }
}

/// Identifies an image container from its leading bytes.
pub fn detect_image_kind(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.len() < 12 {
        return None;
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some(ImageKind::Jpeg);
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(ImageKind::Png);
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageKind::Webp);
    }
    if bytes.starts_with(b"GIF8") {
        return Some(ImageKind::Gif);
    }
    match &bytes[4..12] {
        b"ftypavif" | b"ftypavis" => Some(ImageKind::Avif),
        b"ftypheic" | b"ftypmif1" => Some(ImageKind::Heic),
        _ => None,
    }
}

/// Image bytes ready to inline into a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Downscales so the longest edge fits `max_dim` and re-encodes: PNG when the
/// image carries alpha, JPEG otherwise. `None` when the bytes cannot be
/// decoded, since models only accept formats we can re-encode.
pub fn prepare_for_upload(bytes: &[u8], fallback_mime: &str, max_dim: u32) -> Option<UploadImage> {
    let decoded = match image::load_from_memory(bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!("image decode failed ({err}); not uploading");
            return None;
        }
    };
    let original = || UploadImage {
        bytes: bytes.to_vec(),
        mime_type: detect_image_kind(bytes)
            .map(|kind| kind.mime().to_string())
            .unwrap_or_else(|| fallback_mime.to_string()),
    };

    let dim = max_dim.max(64);
    let resized = if decoded.width().max(decoded.height()) > dim {
        decoded.resize(dim, dim, FilterType::Lanczos3)
    } else {
        decoded
    };

    if resized.color().has_alpha() {
        let mut out = Cursor::new(Vec::new());
        if resized.write_to(&mut out, ImageFormat::Png).is_ok() {
            return Some(UploadImage {
                bytes: out.into_inner(),
                mime_type: "image/png".to_string(),
            });
        }
        return Some(original());
    }

    let rgb = resized.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, 85);
    if encoder.encode_image(&rgb).is_ok() {
        return Some(UploadImage {
            bytes: out,
            mime_type: "image/jpeg".to_string(),
        });
    }
    Some(original())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::{detect_image_kind, prepare_for_upload, ImageKind};

    fn png_bytes(width: u32, height: u32, alpha: bool) -> Vec<u8> {
        let image = if alpha {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128])))
        } else {
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 20, 30])))
        };
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn detects_common_containers() {
        assert_eq!(detect_image_kind(&png_bytes(2, 2, false)), Some(ImageKind::Png));
        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe0];
        jpeg.extend_from_slice(&[0; 12]);
        assert_eq!(detect_image_kind(&jpeg), Some(ImageKind::Jpeg));
        assert_eq!(
            detect_image_kind(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageKind::Webp)
        );
        assert_eq!(
            detect_image_kind(b"\x00\x00\x00\x18ftypheic\x00\x00"),
            Some(ImageKind::Heic)
        );
        assert_eq!(detect_image_kind(b"<!DOCTYPE html><html>"), None);
        assert_eq!(detect_image_kind(b"tiny"), None);
    }

    #[test]
    fn mime_mapping_round_trips_extensions() {
        assert_eq!(ImageKind::from_mime("image/jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_mime("IMAGE/PNG; charset=binary"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_mime("text/html"), None);
        assert_eq!(ImageKind::Webp.extension(), "webp");
    }

    #[test]
    fn opaque_images_are_downscaled_to_jpeg() -> anyhow::Result<()> {
        let prepared = prepare_for_upload(&png_bytes(256, 128, false), "image/png", 64)
            .ok_or_else(|| anyhow::anyhow!("png should decode"))?;
        assert_eq!(prepared.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        Ok(())
    }

    #[test]
    fn transparent_images_stay_png() -> anyhow::Result<()> {
        let prepared = prepare_for_upload(&png_bytes(32, 32, true), "image/png", 1024)
            .ok_or_else(|| anyhow::anyhow!("png should decode"))?;
        assert_eq!(prepared.mime_type, "image/png");
        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
        Ok(())
    }

    #[test]
    fn undecodable_containers_are_not_uploaded() {
        let heic = b"\x00\x00\x00\x18ftypheic\x00\x00\x00\x00".to_vec();
        assert_eq!(detect_image_kind(&heic), Some(ImageKind::Heic));
        assert_eq!(prepare_for_upload(&heic, "image/heic", 1024), None);
        let avif = b"\x00\x00\x00\x1cftypavif\x00\x00\x00\x00mif1".to_vec();
        assert_eq!(detect_image_kind(&avif), Some(ImageKind::Avif));
        assert_eq!(prepare_for_upload(&avif, "image/avif", 1024), None);
    }
}
