//! Content-type lookup and response formats.
//!
//! The MIME type of a file extension, and the [`Format`]s a client asked
//! for in `Accept`.

/// Fallback for extensions without a registered type.
pub const DEFAULT_MIME: &str = "text/plain";

/// MIME type for the extension of `path`, or `default` when unknown.
///
/// JavaScript is always reported as `application/javascript`, whichever
/// name the registry prefers.
pub fn mime_type<'a>(path: &str, default: &'a str) -> &'a str {
    match mime_guess::from_path(path).first_raw() {
        Some("text/javascript") => "application/javascript",
        Some(mime) => mime,
        None => default,
    }
}

/// Whether a precompressed `.gz` sibling is worth looking for.
pub fn is_compressible(mime: &str) -> bool {
    mime.starts_with("text/") || mime.starts_with("application/javascript")
}

// ── Format ────────────────────────────────────────────────────────────────────

/// A response representation negotiated from the `Accept` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Html,
    Js,
    Json,
    Text,
    Xml,
    Other(String),
}

impl Format {
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "text/html" | "application/xhtml+xml"           => Self::Html,
            "application/javascript" | "text/javascript"    => Self::Js,
            "application/json"                              => Self::Json,
            "text/plain"                                    => Self::Text,
            "application/xml" | "text/xml"                  => Self::Xml,
            other                                           => Self::Other(other.to_owned()),
        }
    }

    pub fn mime(&self) -> &str {
        match self {
            Self::Html      => "text/html",
            Self::Js        => "application/javascript",
            Self::Json      => "application/json",
            Self::Text      => "text/plain",
            Self::Xml       => "application/xml",
            Self::Other(m)  => m,
        }
    }
}

/// Parses an `Accept` header into formats, most preferred first.
///
/// Entries with `q=0` are dropped; ties keep header order. An absent header,
/// or one whose first choice is a wildcard, means HTML.
pub fn negotiate(accept: Option<&str>) -> Vec<Format> {
    let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
        return vec![Format::Html];
    };

    let mut ranked: Vec<(u16, &str)> = accept
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let mime = parts.next()?.trim();
            let q = parts
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            let q = (q.clamp(0.0, 1.0) * 1000.0) as u16;
            (q > 0 && !mime.is_empty()).then_some((q, mime))
        })
        .collect();
    // Stable sort keeps header order among equal q-values.
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    match ranked.first() {
        None => vec![Format::Html],
        Some((_, first)) if first.contains('*') => vec![Format::Html],
        Some(_) => ranked
            .into_iter()
            .filter(|(_, m)| !m.contains('*'))
            .map(|(_, m)| Format::from_mime(&m.to_ascii_lowercase()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_by_extension() {
        assert_eq!(mime_type("/app.js", DEFAULT_MIME), "application/javascript");
        assert_eq!(mime_type("/STYLE.CSS", DEFAULT_MIME), "text/css");
        assert_eq!(mime_type("/movie.mp4", DEFAULT_MIME), "video/mp4");
        assert_eq!(mime_type("/song.mp3", DEFAULT_MIME), "audio/mpeg");
        assert_eq!(mime_type("/assets.v1/README", DEFAULT_MIME), DEFAULT_MIME);
        assert_eq!(mime_type("/blob.bin", "application/octet-stream"), "application/octet-stream");
    }

    #[test]
    fn compressible_types() {
        assert!(is_compressible("text/css"));
        assert!(is_compressible("application/javascript"));
        assert!(!is_compressible("image/png"));
        for path in ["/movie.mp4", "/font.otf", "/song.mp3", "/photo.avif"] {
            assert!(!is_compressible(mime_type(path, DEFAULT_MIME)), "{path}");
        }
    }

    #[test]
    fn negotiates_by_quality() {
        let formats = negotiate(Some("text/html;q=0.5, application/json"));
        assert_eq!(formats, vec![Format::Json, Format::Html]);
    }

    #[test]
    fn wildcard_or_missing_means_html() {
        assert_eq!(negotiate(None), vec![Format::Html]);
        assert_eq!(negotiate(Some("*/*")), vec![Format::Html]);
        assert_eq!(negotiate(Some("application/xml;q=0")), vec![Format::Html]);
    }
}
