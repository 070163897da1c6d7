//! Output file naming.
//!
//! The final name always keeps the original content's extension, whatever the
//! requester typed.

use uuid::Uuid;

/// Fallback when a URL has no usable path basename.
pub const URL_FALLBACK_NAME: &str = "downloaded_file";

/// Reply that keeps the configured default output name.
pub const DEFAULT_NAME_COMMAND: &str = "/default";

/// Extension without the leading dot, if the name has one.
///
/// Dotfiles such as `.bashrc` have no extension.
#[must_use]
pub fn extension(file_name: &str) -> Option<&str> {
    let base = basename(file_name);
    match base.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == base.len() => None,
        Some(idx) => Some(&base[idx + 1..]),
    }
}

/// Name without its extension.
#[must_use]
pub fn stem(file_name: &str) -> &str {
    let base = basename(file_name);
    match extension(base) {
        Some(ext) => &base[..base.len() - ext.len() - 1],
        None => base,
    }
}

/// Extension including the dot (`".mp4"`), or empty.
#[must_use]
pub fn dotted_extension(file_name: &str) -> String {
    extension(file_name)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Build the delivered file name from the requester's reply.
///
/// Any extension the requester typed is dropped and replaced by the original
/// one. Blank replies and [`DEFAULT_NAME_COMMAND`] fall back to `default_name`.
#[must_use]
pub fn final_file_name(custom: Option<&str>, default_name: &str, original: &str) -> String {
    let chosen = custom
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != DEFAULT_NAME_COMMAND)
        .unwrap_or(default_name);
    let chosen = sanitize(stem(chosen));
    let chosen = if chosen.is_empty() {
        sanitize(default_name)
    } else {
        chosen
    };
    format!("{chosen}{}", dotted_extension(original))
}

/// Collision-resistant name for temporary artifacts: `{stem}_{uuid}{ext}`.
#[must_use]
pub fn unique_file_name(file_name: &str) -> String {
    format!(
        "{}_{}{}",
        stem(file_name),
        Uuid::new_v4().simple(),
        dotted_extension(file_name)
    )
}

/// File name derived from a URL path, or [`URL_FALLBACK_NAME`].
#[must_use]
pub fn name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let decoded = percent_decode(segment);
            sanitize(&decoded)
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| URL_FALLBACK_NAME.to_string())
}

fn basename(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// Strip path separators and control characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Percent-decode a path segment. Invalid UTF-8 is replaced, not rejected.
fn percent_decode(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
        },
    }
}
