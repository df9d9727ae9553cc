//! Magic-byte checks of uploaded content against its declared extension.

use crate::{FilesError, FilesResult};
use vault_types::FileExtension;

/// Extensions that accept any byte content.
const GENERIC_EXTENSIONS: &[&str] = &["bin", "dat"];

/// Groups of extensions that share a container signature. A declared extension passes when
/// the detected type is in the same group.
const ALIAS_GROUPS: &[&[&str]] = &[
    &["jpg", "jpeg", "jpe", "jfif"],
    &["tif", "tiff"],
    &["mp4", "m4v", "m4a", "m4b", "mov", "3gp", "3g2"],
    &["webm", "mkv", "mka"],
    &["ogg", "oga", "ogv", "opus", "ogx"],
    &["mp3", "mpga"],
    &["htm", "html"],
    &[
        "zip", "docx", "xlsx", "pptx", "odt", "ods", "odp", "epub", "jar", "apk",
    ],
    &["gz", "tgz"],
];

/// Extensions whose files always begin with a recognisable signature.
const SIGNATURE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff", "pdf", "mp4", "m4v", "m4a", "mov",
    "webm", "mkv", "ogg", "flac", "wav", "avi", "zip", "gz", "7z", "rar",
];

/// Extensions expected to hold UTF-8 text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "tsv", "json", "md", "xml", "yaml", "yml", "log", "srt", "vtt", "svg", "htm",
    "html",
];

fn same_family(declared: &str, detected: &str) -> bool {
    if declared == detected {
        return true;
    }
    ALIAS_GROUPS
        .iter()
        .any(|group| group.contains(&declared) && group.contains(&detected))
}

/// Best-effort MIME type of `head`, if a signature is recognised.
pub fn detect_mime(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.mime_type())
}

/// Checks that the leading bytes of a file are plausible for `extension`.
///
/// `head` should be the first [`crate::SNIFF_LEN`] bytes (or the whole file if shorter).
///
/// # Errors
///
/// Returns `FilesError::ContentMismatch` when a recognised signature belongs to a different
/// type, when a signature-bearing extension has no signature, or when a text extension holds
/// invalid UTF-8.
pub fn validate_content(head: &[u8], extension: &FileExtension) -> FilesResult<()> {
    let declared = extension.as_str();
    if GENERIC_EXTENSIONS.contains(&declared) {
        return Ok(());
    }

    let mismatch = |detected: &str| FilesError::ContentMismatch {
        extension: declared.to_owned(),
        detected: detected.to_owned(),
    };

    if let Some(kind) = infer::get(head) {
        if same_family(declared, kind.extension()) {
            return Ok(());
        }
        if kind.matcher_type() == infer::MatcherType::Text && TEXT_EXTENSIONS.contains(&declared) {
            return Ok(());
        }
        return Err(mismatch(kind.mime_type()));
    }

    if SIGNATURE_EXTENSIONS.contains(&declared) {
        return Err(mismatch("unrecognised content"));
    }

    if TEXT_EXTENSIONS.contains(&declared) {
        if let Err(e) = std::str::from_utf8(head) {
            // A multi-byte sequence cut off by the sniff window is not an error.
            if e.error_len().is_some() {
                return Err(mismatch("binary data"));
            }
        }
    }

    Ok(())
}
