use std::path::Path;

use serde::{Deserialize, Serialize};

/// Installable mod package extensions.
pub const MOD_EXTENSIONS: &[&str] = &["pmp", "ttmp2", "ttmp"];

/// Container formats that are unpacked before installation.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    ModFile,
    Archive,
    Unsupported,
}

/// Archive container, used to pick an extraction backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
}

/// Classify `path` by its extension, ignoring case.
pub fn classify(path: &Path) -> FileKind {
    let Some(ext) = lowercase_extension(path) else {
        return FileKind::Unsupported;
    };

    if MOD_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::ModFile
    } else if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Archive
    } else {
        FileKind::Unsupported
    }
}

pub fn is_supported(path: &Path) -> bool {
    classify(path) != FileKind::Unsupported
}

pub fn archive_format(path: &Path) -> Option<ArchiveFormat> {
    match lowercase_extension(path)?.as_str() {
        "zip" => Some(ArchiveFormat::Zip),
        "7z" => Some(ArchiveFormat::SevenZip),
        "rar" => Some(ArchiveFormat::Rar),
        _ => None,
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}
