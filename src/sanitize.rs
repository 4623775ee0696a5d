//! Title and filename sanitizing.

use url::Url;

/// Maximum length (in characters) of a sanitized title.
pub const MAX_TITLE_CHARS: usize = 50;

/// Reduce an arbitrary page/video title to a filesystem-safe string.
///
/// Keeps letters and digits from any script, spaces, `-` and `_`; drops
/// everything else, collapses whitespace runs and truncates to
/// [`MAX_TITLE_CHARS`]. Returns `None` when nothing usable is left.
#[must_use]
pub fn sanitize_title(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let trimmed = truncated.trim_matches(|c: char| c == ' ' || c == '-' || c == '_');

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Sanitize `raw`, falling back to `default` when the result would be empty.
#[must_use]
pub fn title_or_default(raw: Option<&str>, default: &str) -> String {
    raw.and_then(sanitize_title)
        .unwrap_or_else(|| default.to_string())
}

/// Last path segment of a URL when it looks like a file name (`clip.mp4`).
#[must_use]
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let decoded = urlencoding::decode(segment).ok()?;
    let (stem, ext) = decoded.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let stem = sanitize_title(stem)?;
    Some(format!("{stem}.{}", ext.to_ascii_lowercase()))
}

/// Build an attachment filename from a title and an extension.
///
/// A title that already ends in `.ext` is kept as is.
#[must_use]
pub fn attachment_name(title: &str, extension: &str) -> String {
    let suffix = format!(".{extension}");
    if title.to_ascii_lowercase().ends_with(&suffix) {
        title.to_string()
    } else {
        format!("{title}{suffix}")
    }
}

/// `Content-Disposition` value for an attachment.
///
/// Non-ASCII names get an ASCII `filename` fallback plus an RFC 5987
/// `filename*` parameter carrying the real name.
#[must_use]
pub fn content_disposition(file_name: &str) -> String {
    if file_name.is_ascii() {
        return format!("attachment; filename=\"{file_name}\"");
    }
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}
