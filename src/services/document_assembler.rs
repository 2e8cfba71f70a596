//! Turns an ordered page list into a PDF.
//!
//! Pages that cannot be decoded are skipped and reported; only a failure to
//! serialize the document itself is fatal.

use crate::models::archive::{ImageKind, PageOrder};
use crate::services::pdf_writer::{ColorSpace, PageImage, PdfBuilder};
use image::{ImageDecoder, ImageFormat, codecs::jpeg::JpegDecoder};
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("failed to write PDF: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Per-page failure; the page is left out of the document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("unsupported page format for `{path}`: {reason}")]
    UnsupportedPageFormat { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPage {
    pub path: String,
    pub reason: String,
}

impl From<PageError> for SkippedPage {
    fn from(err: PageError) -> Self {
        match err {
            PageError::UnsupportedPageFormat { path, reason } => Self { path, reason },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    pub embedded: usize,
    pub skipped: Vec<SkippedPage>,
}

#[derive(Debug, Clone, Copy)]
enum Codec {
    Jpeg,
    Raster(ImageFormat),
}

/// Decoders to try for a page, in preference order.
fn codecs_for(kind: ImageKind) -> &'static [Codec] {
    match kind {
        ImageKind::Jpeg => &[Codec::Jpeg],
        ImageKind::Png => &[Codec::Raster(ImageFormat::Png)],
        ImageKind::Pdg => &[Codec::Jpeg, Codec::Raster(ImageFormat::Png)],
        ImageKind::Bmp => &[Codec::Raster(ImageFormat::Bmp)],
        ImageKind::Tiff => &[Codec::Raster(ImageFormat::Tiff)],
        ImageKind::Gif => &[Codec::Raster(ImageFormat::Gif)],
    }
}

/// Build a PDF with one page per decodable image, in `order`.
pub fn assemble(order: PageOrder) -> Result<AssembledDocument, AssemblyError> {
    let total = order.len();
    let mut builder = PdfBuilder::new();
    let mut skipped = Vec::new();

    for page in order.pages {
        match decode_page(&page.path, page.kind, &page.data) {
            Ok(image) => {
                debug!(path = %page.path, dimensions = ?image.dimensions(), "embedding page");
                builder.add_image_page(image)?;
            }
            Err(err) => {
                warn!(error = %err, "skipping page");
                skipped.push(SkippedPage::from(err));
            }
        }
    }

    let embedded = builder.page_count();
    let bytes = builder.finish()?;
    info!(
        total,
        embedded,
        skipped = skipped.len(),
        size = bytes.len(),
        "document assembled"
    );
    Ok(AssembledDocument {
        bytes,
        embedded,
        skipped,
    })
}

fn decode_page(path: &str, kind: ImageKind, data: &[u8]) -> Result<PageImage, PageError> {
    let mut reasons = Vec::new();
    for codec in codecs_for(kind) {
        let attempt = match codec {
            Codec::Jpeg => decode_jpeg(data),
            Codec::Raster(format) => decode_raster(data, *format),
        };
        match attempt {
            Ok(image) => return Ok(image),
            Err(reason) => {
                debug!(path, codec = ?codec, reason = %reason, "decoder rejected page");
                reasons.push(reason);
            }
        }
    }
    Err(PageError::UnsupportedPageFormat {
        path: path.to_string(),
        reason: reasons.join("; "),
    })
}

struct JpegHeader {
    components: u8,
    adobe: bool,
}

/// Walk the marker segments up to the first frame header.
fn read_jpeg_header(data: &[u8]) -> Option<JpegHeader> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut adobe = false;
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        match marker {
            0xEE => adobe |= data.get(pos + 4..pos + 9) == Some(b"Adobe".as_slice()),
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let components = *data.get(pos + 9)?;
                return Some(JpegHeader { components, adobe });
            }
            _ => {}
        }
        pos += 2 + len;
    }
    None
}

fn decode_jpeg(data: &[u8]) -> Result<PageImage, String> {
    let decoder = JpegDecoder::new(Cursor::new(data)).map_err(|err| format!("jpeg: {err}"))?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err("jpeg: empty image".into());
    }
    let header = read_jpeg_header(data).ok_or("jpeg: missing frame header")?;
    let color = match header.components {
        1 => ColorSpace::Gray,
        3 => ColorSpace::Rgb,
        4 => ColorSpace::Cmyk,
        n => return Err(format!("jpeg: unsupported component count {n}")),
    };
    Ok(PageImage::Jpeg {
        width,
        height,
        color,
        inverted: color == ColorSpace::Cmyk && header.adobe,
        data: data.to_vec(),
    })
}

fn decode_raster(data: &[u8], format: ImageFormat) -> Result<PageImage, String> {
    let name = format!("{format:?}").to_lowercase();
    let img = image::load_from_memory_with_format(data, format)
        .map_err(|err| format!("{name}: {err}"))?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(format!("{name}: empty image"));
    }

    let color_type = img.color();
    let (color, samples, alpha) = match (color_type.has_color(), color_type.has_alpha()) {
        (true, true) => {
            let (samples, alpha) = split_alpha(&img.to_rgba8().into_raw(), 4);
            (ColorSpace::Rgb, samples, alpha)
        }
        (false, true) => {
            let (samples, alpha) = split_alpha(&img.to_luma_alpha8().into_raw(), 2);
            (ColorSpace::Gray, samples, alpha)
        }
        (true, false) => (ColorSpace::Rgb, img.to_rgb8().into_raw(), None),
        (false, false) => (ColorSpace::Gray, img.to_luma8().into_raw(), None),
    };

    Ok(PageImage::Raw {
        width,
        height,
        color,
        samples,
        alpha,
    })
}

/// Separate the trailing alpha channel; a fully opaque mask is dropped.
fn split_alpha(raw: &[u8], stride: usize) -> (Vec<u8>, Option<Vec<u8>>) {
    let pixels = raw.len() / stride;
    let mut samples = Vec::with_capacity(pixels * (stride - 1));
    let mut alpha = Vec::with_capacity(pixels);
    for px in raw.chunks_exact(stride) {
        samples.extend_from_slice(&px[..stride - 1]);
        alpha.push(px[stride - 1]);
    }
    let opaque = alpha.iter().all(|&a| a == u8::MAX);
    (samples, (!opaque).then_some(alpha))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))),
            ImageFormat::Jpeg,
        )
    }

    pub fn gray_jpeg(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([90]))),
            ImageFormat::Jpeg,
        )
    }

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 250]))),
            ImageFormat::Png,
        )
    }

    pub fn translucent_png(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 80]))),
            ImageFormat::Png,
        )
    }

    pub fn bmp(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([1, 2, 3]))),
            ImageFormat::Bmp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::models::archive::{ClassifiedPage, PageRole};
    use lopdf::Document;

    fn page(path: &str, data: Vec<u8>) -> ClassifiedPage {
        ClassifiedPage {
            path: path.to_string(),
            kind: ImageKind::from_path(path).unwrap(),
            role: PageRole::Content,
            data,
        }
    }

    fn media_boxes(bytes: &[u8]) -> Vec<(i64, i64)> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let mb = doc
                    .get_dictionary(*id)
                    .unwrap()
                    .get(b"MediaBox")
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .clone();
                (mb[2].as_i64().unwrap(), mb[3].as_i64().unwrap())
            })
            .collect()
    }

    #[test]
    fn every_supported_format_becomes_a_page_in_order() {
        let order = PageOrder {
            pages: vec![
                page("a.jpg", fixtures::jpeg(30, 20)),
                page("b.png", fixtures::png(12, 18)),
                page("c.bmp", fixtures::bmp(5, 6)),
                page("d.jpeg", fixtures::gray_jpeg(8, 9)),
                page("e.png", fixtures::translucent_png(4, 4)),
            ],
        };
        let doc = assemble(order).unwrap();
        assert_eq!(doc.embedded, 5);
        assert!(doc.skipped.is_empty());
        assert_eq!(
            media_boxes(&doc.bytes),
            vec![(30, 20), (12, 18), (5, 6), (8, 9), (4, 4)]
        );
    }

    #[test]
    fn pdg_falls_back_from_jpeg_to_png() {
        let order = PageOrder {
            pages: vec![
                page("000001.pdg", fixtures::jpeg(7, 7)),
                page("000002.pdg", fixtures::png(9, 3)),
            ],
        };
        let doc = assemble(order).unwrap();
        assert_eq!(doc.embedded, 2);
        assert_eq!(media_boxes(&doc.bytes), vec![(7, 7), (9, 3)]);
    }

    #[test]
    fn undecodable_pages_are_skipped_not_fatal() {
        let order = PageOrder {
            pages: vec![
                page("1.jpg", fixtures::jpeg(10, 10)),
                page("2.jpg", b"not an image".to_vec()),
                // extension decides the decoder: PNG bytes named .jpg are refused
                page("3.jpg", fixtures::png(10, 10)),
                page("4.png", fixtures::png(11, 12)),
            ],
        };
        let doc = assemble(order).unwrap();
        assert_eq!(doc.embedded, 2);
        let skipped: Vec<_> = doc.skipped.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(skipped, vec!["2.jpg", "3.jpg"]);
        assert_eq!(media_boxes(&doc.bytes), vec![(10, 10), (11, 12)]);
    }

    #[test]
    fn all_pages_skipped_still_yields_a_document() {
        let order = PageOrder {
            pages: vec![page("x.pdg", b"garbage".to_vec())],
        };
        let doc = assemble(order).unwrap();
        assert_eq!(doc.embedded, 0);
        assert_eq!(doc.skipped.len(), 1);
        assert!(doc.skipped[0].reason.contains("jpeg"));
        assert!(doc.skipped[0].reason.contains("png"));
        assert!(media_boxes(&doc.bytes).is_empty());
    }

    #[test]
    fn jpeg_header_reports_components() {
        let header = read_jpeg_header(&fixtures::gray_jpeg(3, 3)).unwrap();
        assert_eq!(header.components, 1);
        let header = read_jpeg_header(&fixtures::jpeg(3, 3)).unwrap();
        assert_eq!(header.components, 3);
        assert!(read_jpeg_header(b"\xFF\xD8").is_none());
    }

    #[test]
    fn opaque_alpha_is_dropped() {
        let (samples, alpha) = split_alpha(&[1, 2, 3, 255, 4, 5, 6, 255], 4);
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
        assert!(alpha.is_none());
        let (_, alpha) = split_alpha(&[9, 0, 9, 255], 2);
        assert_eq!(alpha, Some(vec![0, 255]));
    }
}
