//! Archive entries and the pages derived from them.

use serde::Serialize;

/// One file inside a decoded archive.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Full path inside the archive, possibly with nested directories.
    pub path: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Directory markers carry no payload or end in a path separator.
    pub fn is_directory_marker(&self) -> bool {
        self.data.is_empty() || self.path.ends_with('/') || self.path.ends_with('\\')
    }

    /// Final path segment after normalizing `\` to `/`.
    pub fn basename(&self) -> &str {
        self.path
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.path)
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Image formats recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    /// Legacy scanned-page container; in practice JPEG or PNG bytes.
    Pdg,
    Bmp,
    Tiff,
    Gif,
}

impl ImageKind {
    /// Infer the kind from a path's (case-insensitive) extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        let (_, ext) = lower.rsplit_once('.')?;
        match ext {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "pdg" => Some(Self::Pdg),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }
}

/// Where a page lands in the final document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageRole {
    FrontCover,
    BackCover,
    Content,
}

/// An archive entry recognized as an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPage {
    pub path: String,
    pub data: Vec<u8>,
    pub kind: ImageKind,
    pub role: PageRole,
}

/// Final page sequence: front cover, ordered content, back cover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOrder {
    pub pages: Vec<ClassifiedPage>,
}

impl PageOrder {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.path.as_str()).collect()
    }

    pub fn has_front_cover(&self) -> bool {
        self.pages.iter().any(|p| p.role == PageRole::FrontCover)
    }

    pub fn has_back_cover(&self) -> bool {
        self.pages.iter().any(|p| p.role == PageRole::BackCover)
    }
}
