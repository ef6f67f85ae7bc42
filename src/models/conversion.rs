//! File kinds accepted and produced by the converter, and the conversion
//! pairs built from them.

use serde::Serialize;
use std::{fmt, path::Path, str::FromStr};
use thiserror::Error;

/// A file format the service understands.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Png,
    Jpeg,
    Pdf,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::Png, FileKind::Jpeg, FileKind::Pdf];

    /// Short name used in routes (`png-to-pdf`).
    pub fn name(self) -> &'static str {
        match self {
            FileKind::Png => "png",
            FileKind::Jpeg => "jpeg",
            FileKind::Pdf => "pdf",
        }
    }

    /// Extension given to files produced in this kind.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Png => "png",
            FileKind::Jpeg => "jpg",
            FileKind::Pdf => "pdf",
        }
    }

    /// Content type served on download.
    pub fn media_type(self) -> &'static str {
        match self {
            FileKind::Png => "image/png",
            FileKind::Jpeg => "image/jpeg",
            FileKind::Pdf => "application/pdf",
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, FileKind::Pdf)
    }

    /// Whether `filename` carries an extension of this kind (case-insensitive).
    pub fn matches_filename(self, filename: &str) -> bool {
        let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        match self {
            FileKind::Png => ext == "png",
            FileKind::Jpeg => ext == "jpg" || ext == "jpeg",
            FileKind::Pdf => ext == "pdf",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_ascii_uppercase())
    }
}

impl FromStr for FileKind {
    type Err = ConversionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(FileKind::Png),
            "jpg" | "jpeg" => Ok(FileKind::Jpeg),
            "pdf" => Ok(FileKind::Pdf),
            _ => Err(ConversionParseError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionParseError {
    #[error("`{0}` is not a supported file kind")]
    UnknownKind(String),
    #[error("`{0}` is not of the form <source>-to-<target>")]
    Malformed(String),
    #[error("conversion from {from} to {to} is not supported")]
    Unsupported { from: FileKind, to: FileKind },
}

/// A supported source → target pair.
///
/// Exactly one side is a document: images become single-page PDFs and PDFs
/// become an image of their first page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conversion {
    pub source: FileKind,
    pub target: FileKind,
}

impl Conversion {
    pub fn new(source: FileKind, target: FileKind) -> Result<Self, ConversionParseError> {
        if source.is_image() == target.is_image() {
            return Err(ConversionParseError::Unsupported {
                from: source,
                to: target,
            });
        }
        Ok(Self { source, target })
    }

    pub const PNG_TO_PDF: Conversion = Conversion {
        source: FileKind::Png,
        target: FileKind::Pdf,
    };

    pub const PDF_TO_PNG: Conversion = Conversion {
        source: FileKind::Pdf,
        target: FileKind::Png,
    };

    /// Name presented to the downloader: original stem plus the target
    /// extension. Directory components and characters that would break a
    /// `Content-Disposition` header are dropped.
    pub fn output_filename(&self, original: &str) -> String {
        let stem = Path::new(original)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let cleaned: String = stem
            .chars()
            .filter(|c| !c.is_control() && !matches!(c, '"' | '\\' | '/'))
            .collect();
        let stem = if cleaned.trim().is_empty() {
            "converted"
        } else {
            cleaned.trim()
        };
        format!("{}.{}", stem, self.target.extension())
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-to-{}", self.source.name(), self.target.name())
    }
}

impl FromStr for Conversion {
    type Err = ConversionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, target) = s
            .split_once("-to-")
            .ok_or_else(|| ConversionParseError::Malformed(s.to_string()))?;
        Conversion::new(source.parse()?, target.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_route_segments() {
        assert_eq!("png-to-pdf".parse::<Conversion>(), Ok(Conversion::PNG_TO_PDF));
        assert_eq!("PDF-to-PNG".parse::<Conversion>(), Ok(Conversion::PDF_TO_PNG));
        assert_eq!(
            "jpg-to-pdf".parse::<Conversion>().map(|c| c.source),
            Ok(FileKind::Jpeg)
        );
    }

    #[test]
    fn rejects_image_to_image_and_unknown_kinds() {
        assert_eq!(
            "png-to-jpeg".parse::<Conversion>(),
            Err(ConversionParseError::Unsupported {
                from: FileKind::Png,
                to: FileKind::Jpeg
            })
        );
        assert!(matches!(
            "gif-to-pdf".parse::<Conversion>(),
            Err(ConversionParseError::UnknownKind(_))
        ));
        assert!(matches!(
            "png2pdf".parse::<Conversion>(),
            Err(ConversionParseError::Malformed(_))
        ));
    }

    #[test]
    fn matches_extensions_case_insensitively() {
        assert!(FileKind::Png.matches_filename("Scan.PNG"));
        assert!(FileKind::Jpeg.matches_filename("photo.jpeg"));
        assert!(FileKind::Jpeg.matches_filename("photo.JPG"));
        assert!(!FileKind::Pdf.matches_filename("report.pdf.png"));
        assert!(!FileKind::Pdf.matches_filename("pdf"));
    }

    #[test]
    fn output_filename_uses_stem_and_target_extension() {
        assert_eq!(Conversion::PNG_TO_PDF.output_filename("scan.png"), "scan.pdf");
        assert_eq!(
            Conversion::PDF_TO_PNG.output_filename("../../etc/report.pdf"),
            "report.png"
        );
        assert_eq!(
            Conversion::PDF_TO_PNG.output_filename("a\"b.pdf"),
            "ab.png"
        );
        assert_eq!(Conversion::PNG_TO_PDF.output_filename(".png"), ".png.pdf");
        assert_eq!(Conversion::PNG_TO_PDF.output_filename(""), "converted.pdf");
    }
}
