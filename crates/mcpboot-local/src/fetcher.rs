//! URL extraction, HTTP fetch, and one-hop URL discovery.
//!
//! Grounded on the teacher's `LocalFetcher`/`FsCache` shape in
//! `webpipe-local/src/lib.rs` (reqwest client, timeout, user agent) but the
//! HTML handling is a fresh regex pipeline per the spec's explicit
//! "regex-based, no DOM" contract rather than the teacher's `html2text`.

use mcpboot_core::{Error, FetchedContent, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const TRUNCATE_CEILING: usize = 100_000;
const USER_AGENT: &str = "mcpboot/0.1 (+tool-server generator; https://github.com)";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).expect("valid url regex"));

static GITHUB_ROOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/([^/\s]+)/([^/\s]+)/?$").expect("valid github regex")
});

/// Trim trailing prose punctuation that regex URL matching tends to pick up
/// (e.g. a URL at the end of a sentence followed by a period).
fn trim_prose_artifacts(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')'])
}

/// Matches `https?://...`, trims trailing prose punctuation, and dedupes
/// while preserving first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in URL_RE.find_iter(text) {
        let trimmed = trim_prose_artifacts(m.as_str());
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Rewrite a bare GitHub repo root URL to its raw README, per the fetcher
/// contract: `https://github.com/<owner>/<repo>` (no further path) becomes
/// `https://raw.githubusercontent.com/<owner>/<repo>/HEAD/README.md`.
fn github_root_to_raw_readme(url: &str) -> Option<String> {
    let caps = GITHUB_ROOT_RE.captures(url)?;
    Some(format!(
        "https://raw.githubusercontent.com/{}/{}/HEAD/README.md",
        &caps[1], &caps[2]
    ))
}

/// Remove `<script>`, `<style>`, `<nav>`, `<header>`, `<footer>` elements
/// including their contents (non-greedy, case-insensitive, DOTALL).
fn strip_elements_with_content(html: &str) -> String {
    static RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        ["script", "style", "nav", "header", "footer"]
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                    .expect("valid element-strip regex")
            })
            .collect()
    });
    let mut out = html.to_string();
    for re in RES.iter() {
        out = re.replace_all(&out, "").to_string();
    }
    out
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws regex"));

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// The four-step HTML stripper from the spec: drop whole script/style/nav/
/// header/footer elements, replace remaining tags with a space, decode a
/// fixed entity set, then collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let no_blocks = strip_elements_with_content(html);
    let no_tags = TAG_RE.replace_all(&no_blocks, " ").to_string();
    let decoded = decode_entities(&no_tags);
    WS_RE.replace_all(decoded.trim(), " ").trim().to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s.to_string(), false);
    }
    (s.chars().take(max_chars).collect(), true)
}

fn content_type_base(header_value: Option<&str>) -> String {
    header_value
        .unwrap_or("text/plain")
        .split(';')
        .next()
        .unwrap_or("text/plain")
        .trim()
        .to_ascii_lowercase()
}

/// Fetch one URL, applying the GitHub-root rewrite, content-type-aware
/// body handling, truncation, and one-hop URL discovery.
pub async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<FetchedContent> {
    let effective_url = github_root_to_raw_readme(url).unwrap_or_else(|| url.to_string());

    let resp = client
        .get(&effective_url)
        .timeout(FETCH_TIMEOUT)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::Fetch(format!("{url}: HTTP {}", resp.status())));
    }

    let content_type = content_type_base(
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );

    let body = resp
        .text()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

    let processed = if content_type == "text/html" {
        strip_html(&body)
    } else {
        body
    };

    let (truncated_text, _was_truncated) = truncate_chars(&processed, TRUNCATE_CEILING);
    let discovered_urls = extract_urls(&truncated_text);

    Ok(FetchedContent {
        // The returned `url` is the original, user-visible host, even when
        // the GitHub-root rewrite changed what was actually fetched.
        url: url.to_string(),
        text: truncated_text,
        content_type,
        discovered_urls,
    })
}

/// Fetch every URL in parallel. Individual failures are logged and
/// dropped; this never fails the whole batch.
pub async fn fetch_all(client: &reqwest::Client, urls: &[String]) -> Vec<FetchedContent> {
    let futs = urls.iter().map(|u| fetch_one(client, u));
    let results = futures::future::join_all(futs).await;
    let mut out = Vec::new();
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(content) => out.push(content),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fetch failed, dropping URL");
            }
        }
    }
    out
}

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_dedupes_preserving_order() {
        let text = "see https://a.com/x and https://b.com/y, also https://a.com/x again.";
        let urls = extract_urls(text);
        assert_eq!(urls, vec!["https://a.com/x", "https://b.com/y"]);
    }

    #[test]
    fn trims_trailing_prose_punctuation() {
        let text = "Check out https://example.com/docs).";
        let urls = extract_urls(text);
        assert_eq!(urls, vec!["https://example.com/docs"]);
    }

    #[test]
    fn rewrites_github_repo_root() {
        assert_eq!(
            github_root_to_raw_readme("https://github.com/owner/repo"),
            Some("https://raw.githubusercontent.com/owner/repo/HEAD/README.md".to_string())
        );
        assert_eq!(
            github_root_to_raw_readme("https://github.com/owner/repo/"),
            Some("https://raw.githubusercontent.com/owner/repo/HEAD/README.md".to_string())
        );
        assert_eq!(
            github_root_to_raw_readme("https://github.com/owner/repo/issues/3"),
            None
        );
    }

    #[test]
    fn strips_script_style_nav_header_footer_entirely() {
        let html = "<html><head><style>.x{color:red}</style></head><body>\
            <nav>Menu</nav><header>Top</header>\
            <p>Hello &amp; welcome</p>\
            <script>doEvil()</script>\
            <footer>Bottom</footer></body></html>";
        let text = strip_html(html);
        assert_eq!(text, "Hello & welcome");
    }

    #[test]
    fn replaces_remaining_tags_with_space_to_preserve_word_boundaries() {
        let html = "<p>Hello</p><p>World</p>";
        assert_eq!(strip_html(html), "Hello World");
    }

    #[test]
    fn decodes_the_fixed_entity_set() {
        let html = "<p>&lt;a&gt; &quot;b&quot; &#39;c&#39; x&nbsp;y</p>";
        assert_eq!(strip_html(html), "<a> \"b\" 'c' x y");
    }
}
