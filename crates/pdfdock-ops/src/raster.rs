//! Embedding raster images as PDF image XObjects.

use crate::pdf;
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use pdfdock_jobs::TaskFailure;
use std::io::Cursor;
use std::path::Path;

/// File extensions handled as raster images.
pub(crate) const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "tiff", "tif", "bmp"];

/// Points per pixel, taking images to be 96 dpi.
pub(crate) const POINTS_PER_PIXEL: f64 = 0.75;

/// An image XObject added to a document.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Raster {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

impl Raster {
    /// Natural size in points.
    pub fn size(&self) -> (f64, f64) {
        (
            f64::from(self.width) * POINTS_PER_PIXEL,
            f64::from(self.height) * POINTS_PER_PIXEL,
        )
    }
}

pub(crate) fn is_image(path: &Path) -> bool {
    pdf::has_extension(path, IMAGE_EXTENSIONS)
}

/// Decode the image at `path` and add it to `doc`.
///
/// Grayscale and RGB JPEGs are embedded as they are. Everything else is
/// stored as 8-bit RGB, with any alpha channel kept as a soft mask; those
/// streams are left uncompressed for `Document::compress` to deflate.
pub(crate) fn embed(doc: &mut Document, path: &Path) -> Result<Raster, TaskFailure> {
    let bytes = std::fs::read(path)?;
    let unreadable = |e: image::ImageError| {
        TaskFailure::execution(format!(
            "cannot read {} as an image: {}",
            pdf::display_name(path),
            e
        ))
    };

    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(|e| TaskFailure::execution(e.to_string()))?;
    let format = reader.format();
    let decoded = reader.decode().map_err(unreadable)?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(TaskFailure::execution(format!(
            "{} has no pixels",
            pdf::display_name(path)
        )));
    }

    let passthrough = match format {
        Some(ImageFormat::Jpeg) => jpeg_color_space(&bytes),
        _ => None,
    };
    let id = match passthrough {
        Some(color_space) => {
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(width),
                    "Height" => i64::from(height),
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                bytes,
            )
            .with_compression(false);
            doc.add_object(stream)
        }
        None => embed_pixels(doc, &decoded),
    };
    Ok(Raster { id, width, height })
}

/// Color space of a JPEG whose data can be embedded untouched.
fn jpeg_color_space(bytes: &[u8]) -> Option<&'static str> {
    let decoder = JpegDecoder::new(Cursor::new(bytes)).ok()?;
    match decoder.original_color_type() {
        ExtendedColorType::L8 => Some("DeviceGray"),
        ExtendedColorType::Rgb8 => Some("DeviceRGB"),
        _ => None,
    }
}

fn embed_pixels(doc: &mut Document, decoded: &DynamicImage) -> ObjectId {
    let (width, height) = (i64::from(decoded.width()), i64::from(decoded.height()));
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    if decoded.color().has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        if alpha.iter().any(|&a| a < u8::MAX) {
            let mask = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width,
                    "Height" => height,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha,
            ));
            dict.set("SMask", mask);
        }
    }

    doc.add_object(Stream::new(dict, decoded.to_rgb8().into_raw()))
}
