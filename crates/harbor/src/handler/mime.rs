use std::{ffi::OsStr, path::Path};

use super::response::HTML;

/// Content type of a file, inferred from its extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => HTML,
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "text/plain; charset=utf-8",
    }
}
