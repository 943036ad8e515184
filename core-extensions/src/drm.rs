//! DRM page tags.
//!
//! A chapter page that has to be descrambled by its extension is handed to the
//! download orchestrator as `drm://<extensionId>/<originalUrl>`. The
//! orchestrator parses the tag back and asks the bridge to decode the page.

pub const DRM_SCHEME: &str = "drm://";

/// Query parameter an extension appends to mark an image request as scrambled.
pub const DRM_QUERY_MARKER: &str = "drm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmTag {
    pub extension_id: String,
    pub url: String,
}

impl DrmTag {
    /// Parse a tagged page URL. Returns `None` for plain URLs.
    pub fn parse(page_url: &str) -> Option<Self> {
        let rest = page_url.strip_prefix(DRM_SCHEME)?;
        let (extension_id, url) = rest.split_once('/')?;
        if extension_id.is_empty() || url.is_empty() {
            return None;
        }
        Some(Self {
            extension_id: extension_id.to_string(),
            url: url.to_string(),
        })
    }
}

/// Tag `url` as a DRM page owned by `extension_id`.
pub fn tag(extension_id: &str, url: &str) -> String {
    format!("{}{}/{}", DRM_SCHEME, extension_id, url)
}

pub fn is_tagged(page_url: &str) -> bool {
    DrmTag::parse(page_url).is_some()
}

/// Whether the URL's query string carries the DRM marker parameter.
pub fn has_query_marker(url: &str) -> bool {
    let Some((_, query)) = url.split_once('?') else {
        return false;
    };
    let query = query.split('#').next().unwrap_or_default();
    query.split('&').any(|pair| {
        let name = pair.split('=').next().unwrap_or_default();
        name == DRM_QUERY_MARKER
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_and_parse() {
        let tagged = tag("mangaplus", "https://cdn.example.org/p/1.jpg?key=ab/cd");
        assert_eq!(tagged, "drm://mangaplus/https://cdn.example.org/p/1.jpg?key=ab/cd");

        let parsed = DrmTag::parse(&tagged).unwrap();
        assert_eq!(parsed.extension_id, "mangaplus");
        assert_eq!(parsed.url, "https://cdn.example.org/p/1.jpg?key=ab/cd");
    }

    #[test]
    fn test_plain_urls_are_not_tagged() {
        assert!(DrmTag::parse("https://cdn.example.org/p/1.jpg").is_none());
        assert!(DrmTag::parse("drm://").is_none());
        assert!(DrmTag::parse("drm://only-id").is_none());
        assert!(!is_tagged("file:///tmp/1.jpg"));
    }

    #[test]
    fn test_query_marker() {
        assert!(has_query_marker("https://a.b/img?drm=1"));
        assert!(has_query_marker("https://a.b/img?w=2&drm"));
        assert!(!has_query_marker("https://a.b/img?drmkey=1"));
        assert!(!has_query_marker("https://a.b/drm/img.png"));
    }
}
