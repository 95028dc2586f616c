//! Tiny synthetic images for decode/serializer tests, built in-memory so the crate
//! carries no binary test fixtures.

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, Frame, ImageEncoder, Rgba, RgbaImage};

fn tiny_rgba() -> RgbaImage {
    let mut img = RgbaImage::new(2, 2);
    img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
    img.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
    img.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
    img.put_pixel(1, 1, Rgba([255, 255, 0, 255]));
    img
}

/// A 2x2 PNG, four distinct opaque pixels.
pub fn tiny_png() -> Vec<u8> {
    let img = tiny_rgba();
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(&img, img.width(), img.height(), ExtendedColorType::Rgba8)
        .expect("encode tiny png fixture");
    bytes
}

/// A 2x2 JPEG (lossy, so pixels are approximate after decode).
pub fn tiny_jpeg() -> Vec<u8> {
    let rgb = DynamicImage::ImageRgba8(tiny_rgba()).into_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new(&mut bytes)
        .write_image(&rgb, rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .expect("encode tiny jpeg fixture");
    bytes
}

/// A single-frame 2x2 GIF.
pub fn tiny_gif() -> Vec<u8> {
    let img = tiny_rgba();
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .encode_frame(Frame::new(img))
            .expect("encode tiny gif fixture");
    }
    bytes
}
