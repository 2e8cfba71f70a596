//! Picks image entries out of an archive and orders them into pages.

use crate::models::archive::{ArchiveEntry, ClassifiedPage, ImageKind, PageOrder, PageRole};
use crate::services::natural_order::natural_cmp;
use thiserror::Error;
use tracing::{debug, warn};

pub const FRONT_COVER_TOKEN: &str = "cov001";
pub const BACK_COVER_TOKEN: &str = "cov002";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("archive contains no usable images")]
    NoImagesFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub front_cover: Option<ClassifiedPage>,
    pub back_cover: Option<ClassifiedPage>,
    pub content: Vec<ClassifiedPage>,
}

impl Classification {
    /// Front cover, content, back cover.
    pub fn into_page_order(self) -> PageOrder {
        let mut pages = Vec::with_capacity(self.content.len() + 2);
        pages.extend(self.front_cover);
        pages.extend(self.content);
        pages.extend(self.back_cover);
        PageOrder { pages }
    }
}

fn role_of(entry: &ArchiveEntry) -> PageRole {
    let name = entry.basename().to_lowercase();
    if name.contains(FRONT_COVER_TOKEN) {
        PageRole::FrontCover
    } else if name.contains(BACK_COVER_TOKEN) {
        PageRole::BackCover
    } else {
        PageRole::Content
    }
}

/// Filter `entries` to images, split off the covers and naturally sort the
/// rest by full path.
///
/// Entries are scanned in the given order. When several entries match the
/// same cover token the last one keeps the role and the earlier ones are
/// dropped.
pub fn classify(entries: Vec<ArchiveEntry>) -> Result<Classification, ClassifyError> {
    let mut out = Classification::default();

    for entry in entries {
        if entry.is_directory_marker() {
            continue;
        }
        let Some(kind) = ImageKind::from_path(&entry.path) else {
            debug!(path = %entry.path, "skipping non-image entry");
            continue;
        };
        let role = role_of(&entry);
        let page = ClassifiedPage {
            path: entry.path,
            data: entry.data,
            kind,
            role,
        };

        let slot = match role {
            PageRole::FrontCover => &mut out.front_cover,
            PageRole::BackCover => &mut out.back_cover,
            PageRole::Content => {
                out.content.push(page);
                continue;
            }
        };
        if let Some(displaced) = slot.replace(page) {
            warn!(
                path = %displaced.path,
                role = ?role,
                "duplicate cover match, keeping the later entry"
            );
        }
    }

    out.content.sort_by(|a, b| natural_cmp(&a.path, &b.path));

    if out.content.is_empty() && out.front_cover.is_none() && out.back_cover.is_none() {
        return Err(ClassifyError::NoImagesFound);
    }
    debug!(
        content = out.content.len(),
        front_cover = out.front_cover.is_some(),
        back_cover = out.back_cover.is_some(),
        "classified archive entries"
    );
    Ok(out)
}
