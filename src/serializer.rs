//! `CacheSerializer`: image ↔ bytes for disk persistence (spec §4.8).
//!
//! Grounded on the reference crate's implicit "detect format, re-encode or pass
//! through" logic around `StableImage`/`load_image` (`src/image/mod.rs`); spec §4.8
//! makes the default/format-indicated policies explicit, which this module builds out.

use std::io::Cursor;

use image::{ExtendedColorType, ImageEncoder};

use crate::cached_image::CachedImage;
use crate::error::CacheError;

/// The image formats the default serializer distinguishes; anything else round-trips
/// as opaque bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Unknown,
}

impl ImageFormat {
    pub fn detect(original: Option<&[u8]>) -> Self {
        match original.and_then(|bytes| image::guess_format(bytes).ok()) {
            Some(image::ImageFormat::Png) => Self::Png,
            Some(image::ImageFormat::Jpeg) => Self::Jpeg,
            Some(image::ImageFormat::Gif) => Self::Gif,
            _ => Self::Unknown,
        }
    }
}

/// The bytes↔image coder used by the disk layer. A `key` is threaded through purely to
/// make [`CacheError::CannotSerializeImage`] informative; it plays no role in encoding.
pub trait CacheSerializer: Send + Sync {
    /// Serializes `image` for disk, given the `original` bytes it was decoded from (if
    /// any) so format-detecting serializers can preserve the source format.
    fn serialize(&self, key: &str, image: &CachedImage, original: Option<&[u8]>) -> Result<Vec<u8>, CacheError>;

    /// Deserializes disk `bytes` back into an image.
    fn deserialize(&self, key: &str, bytes: &[u8]) -> Result<CachedImage, CacheError>;
}

/// Detects the format from `original`: `Unknown` passes `original` through unchanged;
/// everything else is re-encoded to that detected format after a decode/normalize pass
/// (spec §4.8 "default policy").
#[derive(Default)]
pub struct DefaultCacheSerializer;

impl DefaultCacheSerializer {
    fn encode(&self, key: &str, image: &CachedImage, format: ImageFormat) -> Result<Vec<u8>, CacheError> {
        let rgba = image
            .to_rgba_bytes()
            .map_err(|_| CacheError::CannotSerializeImage { key: key.to_owned() })?;
        let mut out = Vec::new();
        let result = match format {
            ImageFormat::Jpeg => {
                let rgb: Vec<u8> = rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect();
                image::codecs::jpeg::JpegEncoder::new(&mut out).write_image(
                    &rgb,
                    image.width(),
                    image.height(),
                    ExtendedColorType::Rgb8,
                )
            }
            ImageFormat::Gif => {
                let frame = image::Frame::new(
                    image::RgbaImage::from_raw(image.width(), image.height(), rgba)
                        .ok_or(CacheError::CannotSerializeImage { key: key.to_owned() })?,
                );
                let mut encoder = image::codecs::gif::GifEncoder::new(&mut out);
                encoder
                    .encode_frame(frame)
                    .map_err(|_| CacheError::CannotSerializeImage { key: key.to_owned() })?;
                return Ok(out);
            }
            ImageFormat::Png | ImageFormat::Unknown => image::codecs::png::PngEncoder::new(&mut out).write_image(
                &rgba,
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            ),
        };
        result.map_err(|_| CacheError::CannotSerializeImage { key: key.to_owned() })?;
        Ok(out)
    }
}

impl CacheSerializer for DefaultCacheSerializer {
    fn serialize(&self, key: &str, image: &CachedImage, original: Option<&[u8]>) -> Result<Vec<u8>, CacheError> {
        match ImageFormat::detect(original) {
            ImageFormat::Unknown => Ok(original.map(<[u8]>::to_vec).unwrap_or_default()),
            format => self.encode(key, image, format),
        }
    }

    fn deserialize(&self, key: &str, bytes: &[u8]) -> Result<CachedImage, CacheError> {
        crate::decode::decode_and_compress(bytes)
            .map(|(blob, (w, h))| CachedImage::new(blob, w, h))
            .map_err(|_| CacheError::CannotSerializeImage { key: key.to_owned() })
    }
}

/// The caller's requested format wins; falls back to the original format on encode
/// failure, then to `original` bytes (or a normalized PNG re-encode) if that also fails
/// (spec §4.8 "format-indicated variant").
pub struct FormatIndicatedCacheSerializer {
    pub requested: ImageFormat,
    default: DefaultCacheSerializer,
}

impl FormatIndicatedCacheSerializer {
    pub fn new(requested: ImageFormat) -> Self {
        Self {
            requested,
            default: DefaultCacheSerializer,
        }
    }
}

impl CacheSerializer for FormatIndicatedCacheSerializer {
    fn serialize(&self, key: &str, image: &CachedImage, original: Option<&[u8]>) -> Result<Vec<u8>, CacheError> {
        if let Ok(bytes) = self.default.encode(key, image, self.requested) {
            return Ok(bytes);
        }
        let original_format = ImageFormat::detect(original);
        if original_format != self.requested {
            if let Ok(bytes) = self.default.encode(key, image, original_format) {
                return Ok(bytes);
            }
        }
        if let Some(original) = original {
            return Ok(original.to_vec());
        }
        self.default.encode(key, image, ImageFormat::Png)
    }

    fn deserialize(&self, key: &str, bytes: &[u8]) -> Result<CachedImage, CacheError> {
        self.default.deserialize(key, bytes)
    }
}
