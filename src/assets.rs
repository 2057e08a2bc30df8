//! Landing page and static files compiled into the binary.

use crate::codec;
use crate::names::{random_domain, random_key};

const VIEW_TEMPLATE: &str = include_str!("../assets/templates/view.html");

const STATIC_FILES: &[(&str, &[u8])] = &[
    ("static/style.css", include_bytes!("../assets/static/style.css")),
    ("static/main.js", include_bytes!("../assets/static/main.js")),
];

pub const ROBOTS_TXT: &str = "User-agent: * \nDisallow:";

/// Embedded file under `static/`, looked up by its path without the
/// leading slash.
pub fn static_asset(name: &str) -> Option<&'static [u8]> {
    STATIC_FILES
        .iter()
        .find(|(path, _)| *path == name)
        .map(|(_, data)| *data)
}

/// Content type for an embedded asset.
pub fn asset_content_type(name: &str) -> &'static str {
    match codec::mime_for_path(name) {
        "" => codec::OCTET_STREAM,
        known => known,
    }
}

/// Landing page with a fresh domain and key suggestion.
pub fn render_landing(public_url: &str) -> String {
    render_view(public_url, &random_domain(), &random_key())
}

fn render_view(public_url: &str, domain: &str, key: &str) -> String {
    VIEW_TEMPLATE
        .replace("{{public_url}}", &escape_html(public_url))
        .replace("{{domain}}", &escape_html(domain))
        .replace("{{key}}", &escape_html(key))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_view_fills_placeholders() {
        let html = render_view("http://localhost:8010", "swift-otter", "ab12cd");
        assert!(html.contains("http://localhost:8010/swift-otter/"));
        assert!(html.contains("--key ab12cd"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_render_escapes_public_url() {
        let html = render_view("http://x\"><script>", "d", "k");
        assert!(!html.contains("<script>\""));
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn test_static_assets() {
        assert!(static_asset("static/style.css").is_some());
        assert!(static_asset("static/missing.css").is_none());
        assert_eq!(asset_content_type("static/style.css"), "text/css");
        assert_eq!(asset_content_type("static/main.js"), "text/javascript");
    }
}
