//! Image ⇄ PDF conversion.
//!
//! The rest of the service only sees the [`Converter`] trait: raw bytes in,
//! raw bytes out. [`PdfiumConverter`] is the production implementation on top
//! of `pdfium-render`, which wraps a C library and blocks; callers run it on
//! the blocking pool.

use crate::models::conversion::{Conversion, FileKind};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::{io::Cursor, path::PathBuf};
use thiserror::Error;
use tracing::debug;

/// Render scale applied to the first page of a PDF.
const RENDER_SCALE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("PDF is empty")]
    EmptyDocument,
    #[error("invalid {kind} input: {detail}")]
    InvalidInput { kind: FileKind, detail: String },
    #[error("failed to encode {kind} output: {detail}")]
    Encode { kind: FileKind, detail: String },
    #[error("pdf backend unavailable: {0}")]
    Backend(String),
}

/// Turns the bytes of one file kind into another.
///
/// Implementations validate the structural minimum of the source (decodable
/// image, PDF with at least one page) and report anything else as a
/// [`ConversionError`].
pub trait Converter: Send + Sync {
    fn convert(&self, input: &[u8], conversion: Conversion) -> Result<Vec<u8>, ConversionError>;
}

/// Converter backed by the pdfium library.
#[derive(Clone, Debug, Default)]
pub struct PdfiumConverter {
    /// Directory holding the pdfium shared library. Falls back to the
    /// system library when unset or when binding from it fails.
    library_dir: Option<PathBuf>,
}

impl PdfiumConverter {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    fn bind(&self) -> Result<Pdfium, ConversionError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                .or_else(|err| {
                    debug!(
                        "binding pdfium from {} failed ({:?}), trying system library",
                        dir.display(),
                        err
                    );
                    Pdfium::bind_to_system_library()
                }),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ConversionError::Backend(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    /// Place a single image on a new A4 page, scaled to fit and centred.
    fn image_to_pdf(&self, input: &[u8], source: FileKind) -> Result<Vec<u8>, ConversionError> {
        let image = decode_image(input, source)?;
        let pdfium = self.bind()?;

        let backend = |e: PdfiumError| ConversionError::Backend(format!("{:?}", e));
        let mut document = pdfium.create_new_pdf().map_err(backend)?;
        {
            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::a4())
                .map_err(backend)?;

            let (page_w, page_h) = (page.width().value, page.height().value);
            let (img_w, img_h) = (image.width() as f32, image.height() as f32);
            let scale = (page_w / img_w).min(page_h / img_h);
            let (draw_w, draw_h) = (img_w * scale, img_h * scale);

            page.objects_mut()
                .create_image_object(
                    PdfPoints::new((page_w - draw_w) / 2.0),
                    PdfPoints::new((page_h - draw_h) / 2.0),
                    &image,
                    Some(PdfPoints::new(draw_w)),
                    Some(PdfPoints::new(draw_h)),
                )
                .map_err(backend)?;
        }

        let bytes = document
            .save_to_bytes()
            .map_err(|e| ConversionError::Encode {
                kind: FileKind::Pdf,
                detail: format!("{:?}", e),
            })?;
        debug!(
            "{} image {}x{} -> {} byte PDF",
            source,
            image.width(),
            image.height(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Rasterise the first page of a PDF.
    fn pdf_to_image(&self, input: &[u8], target: FileKind) -> Result<Vec<u8>, ConversionError> {
        if input.is_empty() {
            return Err(ConversionError::EmptyDocument);
        }
        let pdfium = self.bind()?;
        let document =
            pdfium
                .load_pdf_from_byte_slice(input, None)
                .map_err(|e| ConversionError::InvalidInput {
                    kind: FileKind::Pdf,
                    detail: format!("{:?}", e),
                })?;

        let pages = document.pages();
        if pages.len() == 0 {
            return Err(ConversionError::EmptyDocument);
        }
        let page = pages.get(0).map_err(|e| ConversionError::InvalidInput {
            kind: FileKind::Pdf,
            detail: format!("{:?}", e),
        })?;

        let config = PdfRenderConfig::new().scale_page_by_factor(RENDER_SCALE);
        let image = page
            .render_with_config(&config)
            .map_err(|e| ConversionError::Backend(format!("{:?}", e)))?
            .as_image();
        debug!(
            "rendered first of {} pages -> {}x{} px",
            pages.len(),
            image.width(),
            image.height()
        );

        encode_image(image, target)
    }
}

impl Converter for PdfiumConverter {
    fn convert(&self, input: &[u8], conversion: Conversion) -> Result<Vec<u8>, ConversionError> {
        if conversion.source.is_image() {
            self.image_to_pdf(input, conversion.source)
        } else {
            self.pdf_to_image(input, conversion.target)
        }
    }
}

fn image_format(kind: FileKind) -> Option<ImageFormat> {
    match kind {
        FileKind::Png => Some(ImageFormat::Png),
        FileKind::Jpeg => Some(ImageFormat::Jpeg),
        FileKind::Pdf => None,
    }
}

/// Decode an uploaded image, trusting nothing but the declared kind.
pub fn decode_image(input: &[u8], kind: FileKind) -> Result<DynamicImage, ConversionError> {
    let format = image_format(kind).ok_or_else(|| ConversionError::InvalidInput {
        kind,
        detail: "not an image kind".into(),
    })?;
    let image = image::load_from_memory_with_format(input, format).map_err(|e| {
        ConversionError::InvalidInput {
            kind,
            detail: e.to_string(),
        }
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ConversionError::InvalidInput {
            kind,
            detail: "image has no pixels".into(),
        });
    }
    Ok(image)
}

/// Encode a rendered page. JPEG has no alpha channel, so it gets RGB.
pub fn encode_image(image: DynamicImage, kind: FileKind) -> Result<Vec<u8>, ConversionError> {
    let format = image_format(kind).ok_or_else(|| ConversionError::Encode {
        kind,
        detail: "not an image kind".into(),
    })?;
    let image = match kind {
        FileKind::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };

    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| ConversionError::Encode {
            kind,
            detail: e.to_string(),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample_png() -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255])));
        encode_image(image, FileKind::Png).unwrap()
    }

    #[test]
    fn decodes_valid_png() {
        let image = decode_image(&sample_png(), FileKind::Png).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn rejects_bytes_that_are_not_the_declared_kind() {
        let err = decode_image(b"%PDF-1.7 not an image", FileKind::Png).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::InvalidInput {
                kind: FileKind::Png,
                ..
            }
        ));
    }

    #[test]
    fn jpeg_encoding_drops_alpha() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 128])));
        let bytes = encode_image(image, FileKind::Jpeg).unwrap();
        let decoded = decode_image(&bytes, FileKind::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }

    #[test]
    fn empty_pdf_fails_before_touching_pdfium() {
        let converter = PdfiumConverter::default();
        let err = converter
            .convert(&[], Conversion::PDF_TO_PNG)
            .unwrap_err();
        assert!(matches!(err, ConversionError::EmptyDocument));
        assert_eq!(err.to_string(), "PDF is empty");
    }

    #[test]
    fn invalid_image_fails_before_touching_pdfium() {
        let converter = PdfiumConverter::default();
        let err = converter
            .convert(b"", Conversion::PNG_TO_PDF)
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidInput { .. }));
    }
}
