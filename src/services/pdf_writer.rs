//! Minimal image-only PDF writer on top of `lopdf`.
//!
//! Each page is exactly as large as its image (one PDF unit per pixel) and
//! holds a single image XObject painted over the whole page.

use flate2::{Compression, write::ZlibEncoder};
use lopdf::{
    Dictionary, Document, Object, ObjectId, Stream,
    content::{Content, Operation},
    dictionary,
};
use std::io::Write;

pub const PDF_VERSION: &str = "1.7";
const PRODUCER: &str = concat!("zip2pdf ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
}

impl ColorSpace {
    fn pdf_name(self) -> &'static str {
        match self {
            Self::Gray => "DeviceGray",
            Self::Rgb => "DeviceRGB",
            Self::Cmyk => "DeviceCMYK",
        }
    }

    fn components(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }
}

/// Image payload ready to be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageImage {
    /// Untouched JPEG stream.
    Jpeg {
        width: u32,
        height: u32,
        color: ColorSpace,
        /// Adobe CMYK JPEGs store inverted samples.
        inverted: bool,
        data: Vec<u8>,
    },
    /// 8-bit samples, row-major, no padding.
    Raw {
        width: u32,
        height: u32,
        color: ColorSpace,
        samples: Vec<u8>,
        alpha: Option<Vec<u8>>,
    },
}

impl PageImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Jpeg { width, height, .. } | Self::Raw { width, height, .. } => {
                (*width, *height)
            }
        }
    }
}

pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append one page showing `image`.
    pub fn add_image_page(&mut self, image: PageImage) -> Result<(), lopdf::Error> {
        let (width, height) = image.dimensions();
        let (w, h) = (i64::from(width), i64::from(height));
        let image_id = self.add_image(image)?;

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w.into(), 0i64.into(), 0i64.into(), h.into(), 0i64.into(), 0i64.into()],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0i64.into(), 0i64.into(), w.into(), h.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    fn add_image(&mut self, image: PageImage) -> Result<ObjectId, lopdf::Error> {
        let id = match image {
            PageImage::Jpeg {
                width,
                height,
                color,
                inverted,
                data,
            } => {
                let mut dict = image_dict(width, height, color);
                dict.set("Filter", "DCTDecode");
                if inverted {
                    let decode: Vec<Object> = (0..color.components())
                        .flat_map(|_| [Object::Integer(1), Object::Integer(0)])
                        .collect();
                    dict.set("Decode", decode);
                }
                let mut stream = Stream::new(dict, data);
                stream.allows_compression = false;
                self.doc.add_object(stream)
            }
            PageImage::Raw {
                width,
                height,
                color,
                samples,
                alpha,
            } => {
                let mut dict = image_dict(width, height, color);
                dict.set("Filter", "FlateDecode");
                if let Some(alpha) = alpha {
                    let mut mask = image_dict(width, height, ColorSpace::Gray);
                    mask.set("Filter", "FlateDecode");
                    let mask_id = self.doc.add_object(Stream::new(mask, deflate(&alpha)?));
                    dict.set("SMask", mask_id);
                }
                self.doc.add_object(Stream::new(dict, deflate(&samples)?))
            }
        };
        Ok(id)
    }

    /// Serialize the document.
    pub fn finish(mut self) -> Result<Vec<u8>, lopdf::Error> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Producer" => Object::string_literal(PRODUCER),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

fn image_dict(width: u32, height: u32, color: ColorSpace) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => color.pdf_name(),
        "BitsPerComponent" => 8i64,
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, lopdf::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> PageImage {
        PageImage::Raw {
            width,
            height,
            color: ColorSpace::Gray,
            samples: vec![128; (width * height) as usize],
            alpha: None,
        }
    }

    #[test]
    fn pages_are_sized_to_their_images() {
        let mut builder = PdfBuilder::new();
        builder.add_image_page(gray(40, 30)).unwrap();
        builder.add_image_page(gray(10, 80)).unwrap();
        let bytes = builder.finish().unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        let boxes: Vec<Vec<i64>> = pages
            .values()
            .map(|id| {
                let page = doc.get_dictionary(*id).unwrap();
                page.get(b"MediaBox")
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|o| o.as_i64().unwrap())
                    .collect()
            })
            .collect();
        assert_eq!(boxes, vec![vec![0, 0, 40, 30], vec![0, 0, 10, 80]]);
    }

    #[test]
    fn empty_document_is_still_a_pdf() {
        let bytes = PdfBuilder::new().finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.7"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.get_pages().is_empty());
    }

    #[test]
    fn alpha_becomes_a_soft_mask() {
        let mut builder = PdfBuilder::new();
        builder
            .add_image_page(PageImage::Raw {
                width: 2,
                height: 2,
                color: ColorSpace::Rgb,
                samples: vec![255; 12],
                alpha: Some(vec![0, 255, 0, 255]),
            })
            .unwrap();
        let doc = Document::load_mem(&builder.finish().unwrap()).unwrap();
        let has_smask = doc.objects.values().any(|obj| {
            obj.as_stream()
                .map(|s| s.dict.has(b"SMask"))
                .unwrap_or(false)
        });
        assert!(has_smask);
    }
}
