use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a transfer. Upload and download task ids live in
/// independent namespaces, so every lookup is scoped by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

impl TransferKind {
    pub const ALL: [TransferKind; 2] = [TransferKind::Upload, TransferKind::Download];
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Upload => write!(f, "upload"),
            TransferKind::Download => write!(f, "download"),
        }
    }
}

/// What a task moves: a single file or a folder with nested children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    File,
    Folder,
}

impl ItemKind {
    pub fn is_folder(&self) -> bool {
        matches!(self, ItemKind::Folder)
    }
}
