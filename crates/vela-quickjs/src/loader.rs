//! Page loading
//!
//! Resolves `about:`, `file:` and `data:` URLs to page content. There is no
//! network stack; other schemes fail the load.

use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose};
use url::Url;

/// Loaded page content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Html(String),
    Script(String),
    Text(String),
}

/// A resolved page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub content: Content,
}

impl Page {
    /// Title from the page's `<title>` element.
    pub fn title(&self) -> Option<String> {
        match &self.content {
            Content::Html(html) => extract_title(html),
            _ => None,
        }
    }

    /// Script sources in document order.
    pub fn scripts(&self) -> Vec<String> {
        match &self.content {
            Content::Html(html) => extract_scripts(html),
            Content::Script(source) => vec![source.clone()],
            Content::Text(_) => Vec::new(),
        }
    }
}

/// Load failure
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("not a local path: {0}")]
    InvalidPath(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data URL: {0}")]
    Data(String),
}

impl LoadError {
    /// Error domain reported with the failed load.
    pub fn domain(&self) -> &'static str {
        match self {
            LoadError::InvalidUrl(_) | LoadError::UnsupportedScheme(_) => "url",
            LoadError::InvalidPath(_) | LoadError::Io { .. } => "file",
            LoadError::Data(_) => "data",
        }
    }

    /// Numeric code reported with the failed load.
    pub fn code(&self) -> i32 {
        match self {
            LoadError::InvalidUrl(_) => 1,
            LoadError::UnsupportedScheme(_) => 2,
            LoadError::InvalidPath(_) => 3,
            LoadError::Io { .. } => 4,
            LoadError::Data(_) => 5,
        }
    }
}

/// Resolve `url` to page content.
pub fn fetch(url: &str) -> Result<Page, LoadError> {
    let parsed = Url::parse(url)?;
    let content = match parsed.scheme() {
        "about" => Content::Html(String::new()),
        "file" => fetch_file(&parsed)?,
        "data" => fetch_data(&parsed)?,
        other => return Err(LoadError::UnsupportedScheme(other.to_string())),
    };
    tracing::debug!("Fetched {}", parsed);
    Ok(Page {
        url: parsed.to_string(),
        content,
    })
}

fn fetch_file(url: &Url) -> Result<Content, LoadError> {
    let path = url
        .to_file_path()
        .map_err(|_| LoadError::InvalidPath(url.to_string()))?;
    let body = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("js" | "mjs") => Content::Script(body),
        Some("html" | "htm") => Content::Html(body),
        _ => Content::Text(body),
    })
}

fn fetch_data(url: &Url) -> Result<Content, LoadError> {
    let (header, payload) = url
        .path()
        .split_once(',')
        .ok_or_else(|| LoadError::Data("missing ','".into()))?;

    let mut params = header.split(';');
    let mime = params.next().unwrap_or("").trim().to_ascii_lowercase();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = percent_decode(payload);
    let body = if is_base64 {
        let compact: Vec<u8> = bytes.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
        general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| LoadError::Data(e.to_string()))?
    } else {
        bytes
    };
    let body = String::from_utf8_lossy(&body).into_owned();

    Ok(match mime.as_str() {
        "text/html" => Content::Html(body),
        "text/javascript" | "application/javascript" => Content::Script(body),
        _ => Content::Text(body),
    })
}

/// Decode `%XX` escapes. Malformed escapes are kept as-is.
pub fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Attributes and body of every `<tag ...>...</tag>`, matched
/// case-insensitively. Elements are not nested.
fn element_bodies(html: &str, tag: &str) -> Vec<(String, String)> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", tag);
    let close = format!("</{}", tag);
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(start) = lower[from..].find(&open).map(|i| i + from) {
        let after_name = start + open.len();
        // `<scripts>` is not `<script>`.
        if !lower[after_name..].starts_with(|c: char| c == '>' || c.is_ascii_whitespace() || c == '/') {
            from = after_name;
            continue;
        }
        let Some(tag_end) = lower[after_name..].find('>').map(|i| i + after_name) else {
            break;
        };
        let attributes = html[after_name..tag_end].to_string();
        let body_start = tag_end + 1;
        let Some(body_end) = lower[body_start..].find(&close).map(|i| i + body_start) else {
            break;
        };
        found.push((attributes, html[body_start..body_end].to_string()));
        from = body_end + close.len();
    }
    found
}

fn extract_title(html: &str) -> Option<String> {
    element_bodies(html, "title")
        .into_iter()
        .next()
        .map(|(_, body)| body.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn extract_scripts(html: &str) -> Vec<String> {
    element_bodies(html, "script")
        .into_iter()
        .filter_map(|(attributes, body)| {
            if attributes.to_ascii_lowercase().contains("src=") {
                tracing::debug!("Skipping external script ({})", attributes.trim());
                return None;
            }
            Some(body)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_blank_is_empty_html() {
        let page = fetch("about:blank").unwrap();
        assert_eq!(page.content, Content::Html(String::new()));
        assert!(page.scripts().is_empty());
    }

    #[test]
    fn test_data_url_script() {
        let page = fetch("data:text/javascript,vela.setTitle(%22hi%22)").unwrap();
        assert_eq!(page.scripts(), vec!["vela.setTitle(\"hi\")".to_string()]);
    }

    #[test]
    fn test_data_url_base64() {
        // "<title>A</title>"
        let page = fetch("data:text/html;base64,PHRpdGxlPkE8L3RpdGxlPg==").unwrap();
        assert_eq!(page.title().as_deref(), Some("A"));
    }

    #[test]
    fn test_data_url_without_comma_fails() {
        let err = fetch("data:text/html").unwrap_err();
        assert!(matches!(err, LoadError::Data(_)));
        assert_eq!(err.domain(), "data");
    }

    #[test]
    fn test_network_scheme_unsupported() {
        let err = fetch("https://example.com/").unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedScheme(ref s) if s == "https"));
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_file_url_by_extension() {
        let dir = std::env::temp_dir().join(format!("vela-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("page.html");
        std::fs::write(&path, "<html><TITLE> Hello\n  World </TITLE><script>1+1</script></html>").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let page = fetch(url.as_str()).unwrap();

        assert_eq!(page.title().as_deref(), Some("Hello World"));
        assert_eq!(page.scripts(), vec!["1+1".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = fetch("file:///definitely/not/here.html").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_scripts_in_order_skipping_external() {
        let html = "<script>a()</script><script src=\"x.js\"></script><scripts>no</scripts><SCRIPT type=module>b()</SCRIPT>";
        assert_eq!(extract_scripts(html), vec!["a()".to_string(), "b()".to_string()]);
    }

    #[test]
    fn test_percent_decode_keeps_malformed() {
        assert_eq!(percent_decode("a%20b%zz%4"), b"a b%zz%4".to_vec());
    }
}
