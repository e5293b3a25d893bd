//! Domain whitelist and the gated-fetch capability built on top of it.
//!
//! Grounded on the teacher's use of `url::Url` for host parsing throughout
//! `webpipe-local`; the subdomain-matching rule and the exact blocked-fetch
//! message wording are a direct implementation of the spec's §4.2 contract.

use mcpboot_core::{Error, FetchedContent, GatedFetch, GatedFetchInit, GatedFetchResponse, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    domains: BTreeSet<String>,
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

impl Whitelist {
    /// Collect the hostname of every well-formed URL in the prompt plus
    /// every URL discovered in any fetched document. Malformed URLs are
    /// silently skipped.
    pub fn build(prompt_urls: &[String], contents: &[FetchedContent]) -> Self {
        let mut domains = BTreeSet::new();
        for u in prompt_urls {
            if let Some(h) = host_of(u) {
                domains.insert(h);
            }
        }
        for c in contents {
            for u in &c.discovered_urls {
                if let Some(h) = host_of(u) {
                    domains.insert(h);
                }
            }
        }
        Self { domains }
    }

    pub fn from_domains(domains: Vec<String>) -> Self {
        Self {
            domains: domains.into_iter().map(|d| d.to_ascii_lowercase()).collect(),
        }
    }

    pub fn domains(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// True iff the URL's hostname equals a member or is a proper
    /// subdomain of one. The reverse never holds: whitelisting
    /// `api.example.com` does not admit `example.com`.
    pub fn allows(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

/// The gated fetch capability exposed to sandboxed handler code: it checks
/// the whitelist and either delegates to the real HTTP client or fails with
/// a message that tells the caller how to fix the situation.
pub struct GatedHttpFetch {
    whitelist: Whitelist,
    client: reqwest::Client,
}

impl GatedHttpFetch {
    pub fn new(whitelist: Whitelist, client: reqwest::Client) -> Arc<Self> {
        Arc::new(Self { whitelist, client })
    }
}

#[async_trait::async_trait]
impl GatedFetch for GatedHttpFetch {
    async fn fetch(&self, url: &str, init: GatedFetchInit) -> Result<GatedFetchResponse> {
        let parsed = url::Url::parse(url).map_err(|_| {
            Error::WhitelistViolation("Fetch blocked: invalid URL".to_string())
        })?;

        if !self.whitelist.allows(url) {
            let host = parsed.host_str().unwrap_or("").to_string();
            return Err(Error::WhitelistViolation(format!(
                "Fetch blocked: domain \"{host}\" not in whitelist. Add it to your prompt to allow access."
            )));
        }

        let method = init
            .method
            .as_deref()
            .unwrap_or("GET")
            .parse::<reqwest::Method>()
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let mut builder = self.client.request(method, url);
        for (k, v) in &init.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = init.body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

        let status = resp.status().as_u16();
        let status_text = resp
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let mut headers = std::collections::BTreeMap::new();
        for (k, v) in resp.headers() {
            if let Ok(v) = v.to_str() {
                headers.insert(k.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?
            .to_vec();

        Ok(GatedFetchResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(url: &str, discovered: &[&str]) -> FetchedContent {
        FetchedContent {
            url: url.to_string(),
            text: String::new(),
            content_type: "text/plain".to_string(),
            discovered_urls: discovered.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn subdomain_matches_but_not_the_reverse() {
        let wl = Whitelist::from_domains(vec!["example.com".to_string()]);
        assert!(wl.allows("https://example.com/x"));
        assert!(wl.allows("https://api.example.com/x"));
        assert!(!wl.allows("https://notexample.com/x"));
        assert!(!wl.allows("https://example.com.evil.net/x"));

        let narrow = Whitelist::from_domains(vec!["api.example.com".to_string()]);
        assert!(!narrow.allows("https://example.com/x"));
    }

    #[test]
    fn closure_includes_prompt_and_discovered_hosts_only() {
        let wl = Whitelist::build(
            &["https://prompt.example.com/a".to_string()],
            &[content("https://docs.example.com", &["https://other.example.org/x"])],
        );
        let domains = wl.domains();
        assert!(domains.contains(&"prompt.example.com".to_string()));
        assert!(domains.contains(&"other.example.org".to_string()));
        assert!(!domains.contains(&"docs.example.com".to_string()));
    }

    #[test]
    fn malformed_urls_are_skipped() {
        let wl = Whitelist::build(&["not a url".to_string()], &[]);
        assert!(wl.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_subdomain_rule_holds(sub in "[a-z]{1,8}", base in "[a-z]{1,8}\\.[a-z]{2,4}") {
            let wl = Whitelist::from_domains(vec![base.clone()]);
            let url = format!("https://{sub}.{base}/path");
            prop_assert!(wl.allows(&url));
            let other = format!("https://not{base}/path");
            prop_assert!(!wl.allows(&other));
        }
    }
}
