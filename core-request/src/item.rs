use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Directory,
    File,
    Unknown,
}

/// A file or directory as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub filename: String,
    pub size: Option<u64>,
    pub file_type: FileType,
    pub mime_type: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub parents: Vec<String>,
    /// Direct link to a preview image, when the backend reports one.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, file_type: FileType) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            size: None,
            file_type,
            mime_type: None,
            modified: None,
            parents: Vec::new(),
            thumbnail_url: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageData {
    pub items: Vec<Item>,
    /// Token of the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Byte range of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    /// `None` reads to the end of the file.
    pub size: Option<u64>,
}

impl Range {
    pub const FULL: Range = Range {
        start: 0,
        size: None,
    };

    pub fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            size: Some(size),
        }
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Value of the `Range` header, or `None` for [`Range::FULL`].
    pub fn header_value(&self) -> Option<String> {
        match self.size {
            _ if self.is_full() => None,
            Some(0) => None,
            Some(size) => Some(format!("bytes={}-{}", self.start, self.start + size - 1)),
            None => Some(format!("bytes={}-", self.start)),
        }
    }
}
