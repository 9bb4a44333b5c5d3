use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

fn nanos_since_epoch() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_nanos()
}

/// Time-derived identifier for downloads started without an explicit id
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{:x}", prefix, nanos_since_epoch())
}

/// Default archive name used when the server does not suggest one
pub fn default_zip_name() -> String {
    format!("download-{}", nanos_since_epoch() % 100_000)
}

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// True when the name already ends in a dot-separated alphanumeric extension
pub fn has_extension(name: &str) -> bool {
    Regex::new(r"\.[a-zA-Z0-9]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Derive a file extension from a Content-Type header value.
/// Strips parameters and structured-syntax suffixes, so
/// "image/svg+xml; charset=utf-8" becomes "svg".
pub fn extension_from_content_type(content_type: &str) -> Option<String> {
    let subtype = content_type.split('/').next_back()?;
    let ext = subtype.split(';').next()?.split('+').next()?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_string())
    }
}

/// Append an extension to `name` if it has none, preferring the response
/// content type over the caller-supplied fallback type. Both run through
/// the same subtype parsing, so a full MIME value works in either slot.
pub fn ensure_extension(name: &str, content_type: Option<&str>, fallback: Option<&str>) -> String {
    if has_extension(name) {
        return name.to_string();
    }
    let ext = content_type
        .and_then(extension_from_content_type)
        .or_else(|| fallback.and_then(extension_from_content_type));
    match ext {
        Some(ext) => format!("{}.{}", name, ext),
        None => name.to_string(),
    }
}

/// MIME type for re-tagging converted image assets. Unknown types fall
/// back to JPEG, which is what the conversion endpoint produces.
pub fn mime_for_image(file_type: &str) -> &'static str {
    match file_type.to_lowercase().as_str() {
        "apng" => "image/apng",
        "avif" => "image/avif",
        "gif" => "image/gif",
        "png" => "image/png",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "image/jpeg",
    }
}

/// Extract the quoted filename from a Content-Disposition header
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let re = Regex::new(r#"filename="(.+)""#).ok()?;
    re.captures(header).map(|caps| caps[1].to_string())
}
