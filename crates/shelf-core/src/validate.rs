//! Input validation for new bookmarks
//!
//! Runs before anything touches the store or the backend. A `NewBookmark` can
//! only be obtained from [`new_bookmark`], so holding one proves the title and
//! URL were checked.

use url::Url;

use crate::error::ValidationError;

/// Maximum title length in characters
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum URL length in characters
pub const MAX_URL_LEN: usize = 2000;

/// Scheme assumed when the user leaves it out
const DEFAULT_SCHEME: &str = "https://";

/// A validated, normalized title/url pair ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    title: String,
    url: String,
}

impl NewBookmark {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Validate and normalize user input
pub fn new_bookmark(title: &str, url: &str) -> Result<NewBookmark, ValidationError> {
    Ok(NewBookmark {
        title: title_of(title)?,
        url: normalize_url(url)?,
    })
}

/// Trim a title and check its length
pub fn title_of(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    let len = title.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyTitle);
    }
    if len > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_TITLE_LEN,
        });
    }
    Ok(title.to_string())
}

/// Trim a URL, prepend `https://` when no scheme is given, and check that
/// the result is an absolute http/https URL with a host
///
/// The returned string keeps the user's spelling; it is not re-serialized,
/// so `https://example.com` stays without a trailing slash.
pub fn normalize_url(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let candidate = if has_scheme(url) {
        url.to_string()
    } else {
        format!("{}{}", DEFAULT_SCHEME, url)
    };

    let len = candidate.chars().count();
    if len > MAX_URL_LEN {
        return Err(ValidationError::UrlTooLong {
            len,
            max: MAX_URL_LEN,
        });
    }

    let parsed = Url::parse(&candidate).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(candidate)
}

/// True when the input starts with `<scheme>://`
///
/// A `://` later in the string (a URL inside the query, say) does not count.
fn has_scheme(url: &str) -> bool {
    url.split_once("://").is_some_and(|(scheme, _)| {
        scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}
